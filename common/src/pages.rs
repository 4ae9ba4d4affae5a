use crate::{
    config::{APPLY_URI, CONFIG_URI, PORTAL_AP_SSID, PORTAL_TITLE},
    types::Orientation,
};

const PAGE_STYLE: &str = "body{font-family:Arial,sans-serif;max-width:480px;margin:2rem auto;\
padding:0 1rem;color:#111}h1{margin:0 0 .5rem}.time{font-size:3.5rem;font-weight:bold;\
letter-spacing:.1em;margin:1rem 0}.muted{color:#555}.card{border:1px solid #ddd;\
border-radius:8px;padding:1rem}label{display:block;margin:.5rem 0 .2rem}\
select,input{width:100%;padding:.5rem;box-sizing:border-box}button{padding:.55rem .9rem;margin-top:.8rem}";

fn page(title: &str, head_extra: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n{head_extra}\
<title>{title}</title>\n<style>{PAGE_STYLE}</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        title = escape_html(title),
    )
}

pub fn home_page(time: Option<&str>, orientation: Orientation, refresh_secs: u32) -> String {
    let time = match time {
        Some(time) => escape_html(time),
        None => "--:--:--".to_string(),
    };
    let head = format!("<meta http-equiv=\"refresh\" content=\"{refresh_secs}\">\n");
    let body = format!(
        "<h1>{PORTAL_TITLE}</h1>\n<div class=\"time\">{time}</div>\n\
<p class=\"muted\">Orientation: {orientation}</p>\n\
<p><a href=\"{CONFIG_URI}\">Clock settings</a></p>\n",
        orientation = orientation.as_str(),
    );
    page(PORTAL_TITLE, &head, &body)
}

pub fn config_page(current: Orientation) -> String {
    let options: String = [Orientation::Normal, Orientation::Rotated]
        .into_iter()
        .map(|orientation| {
            let selected = if orientation == current {
                " selected"
            } else {
                ""
            };
            format!(
                "<option value=\"{value}\"{selected}>{value}</option>",
                value = orientation.as_str()
            )
        })
        .collect();

    let body = format!(
        "<h1>Clock settings</h1>\n<div class=\"card\">\n\
<form action=\"{APPLY_URI}\" method=\"get\">\n\
<label for=\"orientation\">Display orientation</label>\n\
<select id=\"orientation\" name=\"orientation\">{options}</select>\n\
<button type=\"submit\">Apply</button>\n</form>\n</div>\n\
<p><a href=\"/\">Back</a></p>\n"
    );
    page(&format!("{PORTAL_TITLE} - Settings"), "", &body)
}

pub fn provisioning_page(current_ssid: &str) -> String {
    let body = format!(
        "<h1>{PORTAL_TITLE}</h1>\n\
<p class=\"muted\">Connected to access point <code>{PORTAL_AP_SSID}</code>. \
Enter the WiFi network the clock should join; it restarts after saving.</p>\n\
<div class=\"card\">\n<form action=\"/wifi\" method=\"post\">\n\
<label for=\"ssid\">WiFi SSID</label><input id=\"ssid\" name=\"ssid\" type=\"text\" value=\"{ssid}\">\n\
<label for=\"pass\">WiFi Password</label><input id=\"pass\" name=\"pass\" type=\"password\">\n\
<button type=\"submit\">Save and restart</button>\n</form>\n</div>\n\
<p><a href=\"{CONFIG_URI}\">Clock settings</a></p>\n",
        ssid = escape_html(current_ssid),
    );
    page(PORTAL_TITLE, "", &body)
}

pub fn saved_page() -> String {
    let body = format!(
        "<h1>{PORTAL_TITLE}</h1>\n<p>Saved. The clock restarts and joins the network.</p>\n"
    );
    page(PORTAL_TITLE, "", &body)
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
