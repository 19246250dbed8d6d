use sysinfo::System;

/// Host name used for log file names and payload keys.
///
/// An explicit override wins, then the system host name, then `localhost`.
pub fn resolve_hostname(override_name: Option<&str>) -> String {
    let name = override_name
        .map(str::to_string)
        .or_else(System::host_name)
        .unwrap_or_else(|| "localhost".to_string());
    sanitize_for_file_name(&name)
}

/// Host names end up in file names; path separators and whitespace are replaced.
pub fn sanitize_for_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "localhost".to_string()
    } else {
        cleaned
    }
}
