/// Header list as plain pairs so no HTTP crate leaks into the contracts.
pub type Headers = Vec<(String, String)>;

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub fn header_set(headers: &mut Headers, name: &str, value: impl Into<String>) {
    let value = value.into();
    for (key, existing) in headers.iter_mut() {
        if key.eq_ignore_ascii_case(name) {
            *existing = value;
            return;
        }
    }
    headers.push((name.to_string(), value));
}
