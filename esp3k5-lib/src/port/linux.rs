use glob::glob;
use std::fs;

pub fn is_port_open(port_name: &str) -> bool {
    glob("/proc/[0-9]*/fd/*")
        .unwrap()
        .filter_map(|p| match p {
            Ok(path) => Some(path),
            Err(_) => None,
        })
        .filter_map(|path| match fs::read_link(path) {
            Ok(link) => Some(link),
            Err(_) => None,
        })
        .any(|link| link.to_str() == Some(port_name))
}
