/// Well-known TCP ports and their service names.
const WELL_KNOWN: &[(u16, &str)] = &[
    (21, "FTP"),
    (22, "SSH"),
    (23, "TELNET"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (3306, "MYSQL"),
    (3389, "RDP"),
];

/// Service name for a well-known port, `None` for anything else.
pub fn lookup(port: u16) -> Option<&'static str> {
    WELL_KNOWN
        .binary_search_by_key(&port, |&(p, _)| p)
        .ok()
        .map(|idx| WELL_KNOWN[idx].1)
}

/// All known `(port, name)` pairs, ascending by port.
pub fn well_known() -> &'static [(u16, &'static str)] {
    WELL_KNOWN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ports() {
        assert_eq!(lookup(80), Some("HTTP"));
        assert_eq!(lookup(22), Some("SSH"));
        assert_eq!(lookup(3389), Some("RDP"));
    }

    #[test]
    fn unknown_port_is_none() {
        assert_eq!(lookup(1), None);
        assert_eq!(lookup(65535), None);
    }

    #[test]
    fn table_is_sorted() {
        // lookup relies on binary search
        assert!(well_known().windows(2).all(|w| w[0].0 < w[1].0));
    }
}
