pub mod discovery;

/// Product identifier a server must report on the discovery endpoint to
/// be considered compatible.
pub const PRODUCT_TYPE: &str = "cloudbite-api";

/// Default port the backend listens on.
pub const DEFAULT_API_PORT: u16 = 3737;

/// Discovery endpoint — returns the server's identity payload.
pub const DISCOVERY_PATH: &str = "/api/v1/discovery";

/// Health endpoint — any 2xx means the server process is alive.
pub const HEALTH_PATH: &str = "/api/v1/health";

/// Build a base URL for a LAN host.
pub fn base_url(ip: &str, port: u16) -> String {
    format!("http://{}:{}", ip, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_format() {
        assert_eq!(base_url("192.168.1.77", 3737), "http://192.168.1.77:3737");
    }
}
