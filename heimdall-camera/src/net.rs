//! Conversions entre les représentations décimales/hex que certains devices
//! renvoient pour `GevCurrentIPAddress`/`GevMACAddress` et leurs formes lisibles.

/// Convertit une adresse IPv4 encodée en entier 32 bits vers sa forme pointée.
pub fn decimal_to_ip(decimal_ip: u32) -> String {
    let octets = decimal_ip.to_be_bytes();
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

/// Convertit une adresse MAC encodée en entier 48 bits (dans les 48 bits de
/// poids faible d'un u64) vers sa forme `aa:bb:cc:dd:ee:ff`.
pub fn decimal_to_mac(decimal_mac: u64) -> String {
    let bytes = decimal_mac.to_be_bytes();
    bytes[2..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Relit une adresse IP pointée telle que `192.168.1.100`, None si malformée.
pub fn parse_dotted_ip(ip: &str) -> Option<u32> {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        octets[i] = part.parse().ok()?;
    }
    Some(u32::from_be_bytes(octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_to_ip_honors_its_argument() {
        assert_eq!(decimal_to_ip(0), "0.0.0.0");
        assert_eq!(decimal_to_ip(parse_dotted_ip("192.168.1.100").unwrap()), "192.168.1.100");
        assert_eq!(decimal_to_ip(parse_dotted_ip("10.0.0.1").unwrap()), "10.0.0.1");
    }

    #[test]
    fn decimal_to_mac_formats_six_octets() {
        assert_eq!(decimal_to_mac(0x0011_2233_4455_66), "11:22:33:44:55:66");
    }

    #[test]
    fn parse_dotted_ip_rejects_malformed_input() {
        assert!(parse_dotted_ip("not.an.ip").is_none());
        assert!(parse_dotted_ip("1.2.3").is_none());
    }
}
