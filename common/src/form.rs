pub fn form_value(encoded: &str, key: &str) -> Option<String> {
    encoded
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name) == key).then(|| decode_component(value))
        })
}

pub fn query_value(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    form_value(query, key)
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'+' => decoded.push(b' '),
            b'%' if index + 2 < bytes.len() => {
                match (hex_value(bytes[index + 1]), hex_value(bytes[index + 2])) {
                    (Some(high), Some(low)) => {
                        decoded.push((high << 4) | low);
                        index += 2;
                    }
                    _ => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        index += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_orientation_in_query() {
        assert_eq!(
            query_value("/apply?orientation=Inverted", "orientation").as_deref(),
            Some("Inverted")
        );
        assert_eq!(query_value("/apply", "orientation"), None);
        assert_eq!(query_value("/apply?other=1", "orientation"), None);
    }

    #[test]
    fn decodes_percent_and_plus() {
        let body = "ssid=My+Home%20WiFi&pass=p%26ss%3Dword";

        assert_eq!(form_value(body, "ssid").as_deref(), Some("My Home WiFi"));
        assert_eq!(form_value(body, "pass").as_deref(), Some("p&ss=word"));
    }

    #[test]
    fn tolerates_malformed_escapes_and_empty_values() {
        assert_eq!(form_value("pass=100%", "pass").as_deref(), Some("100%"));
        assert_eq!(form_value("pass=%zz", "pass").as_deref(), Some("%zz"));
        assert_eq!(form_value("pass=&ssid=x", "pass").as_deref(), Some(""));
        assert_eq!(form_value("flag", "flag").as_deref(), Some(""));
    }
}
