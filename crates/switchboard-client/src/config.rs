//! Session configuration and broker address parsing.

use std::time::Duration;

use switchboard_core::constants::{PAGE_SIZE, PRODUCTION_PORT, REGISTER_DELAY, TEST_PORT};

use crate::error::ClientError;

/// Lightning network the account lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Mainnet.
    #[default]
    Bitcoin,
    /// Local regression-test network.
    Regtest,
}

impl Network {
    /// Name passed to the crypto core.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Regtest => "regtest",
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Production mode: TLS with the production port.
    pub production: bool,
    /// Broker port in production mode.
    pub production_port: u16,
    /// Broker port in test mode.
    pub test_port: u16,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Page size for the contacts restore phase.
    pub contacts_page_size: u32,
    /// Page size for the messages restore phase and incremental sync.
    pub messages_page_size: u32,
    /// Delay between a register publish and its dependent publishes.
    pub register_delay: Duration,
    /// Network marker for key derivation and signing.
    pub network: Network,
    /// Device descriptor passed to initial setup.
    pub device: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            production: true,
            production_port: PRODUCTION_PORT,
            test_port: TEST_PORT,
            keep_alive: Duration::from_secs(60),
            contacts_page_size: PAGE_SIZE,
            messages_page_size: PAGE_SIZE,
            register_delay: REGISTER_DELAY,
            network: Network::Bitcoin,
            device: "switchboard".to_string(),
        }
    }
}

impl SessionConfig {
    /// Test-mode configuration: plaintext broker on the test port, regtest.
    pub fn test() -> Self {
        Self { production: false, network: Network::Regtest, ..Self::default() }
    }

    /// Default broker port for the current mode.
    pub fn default_port(&self) -> u16 {
        if self.production { self.production_port } else { self.test_port }
    }
}

/// A resolved broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connect over TLS.
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse `host`, `host:port` or `scheme://host[:port]`.
    ///
    /// A missing port is filled from the production/test default. TLS follows
    /// the configured mode, not the scheme.
    pub fn parse(address: &str, config: &SessionConfig) -> Result<Self, ClientError> {
        let invalid = |reason: &str| ClientError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            },
            None => (rest, config.default_port()),
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self { host: host.to_string(), port, tls: config.production })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn bare_host_uses_mode_port() {
        let prod = BrokerEndpoint::parse("mixer.example.com", &SessionConfig::default()).unwrap();
        assert_eq!(prod.port, 8883);
        assert!(prod.tls);

        let test = BrokerEndpoint::parse("localhost", &SessionConfig::test()).unwrap();
        assert_eq!(test.port, 1883);
        assert!(!test.tls);
    }

    #[test]
    fn explicit_port_and_scheme() {
        let ep = BrokerEndpoint::parse("tcp://10.0.0.2:1884/", &SessionConfig::test()).unwrap();
        assert_eq!(ep, BrokerEndpoint { host: "10.0.0.2".to_string(), port: 1884, tls: false });
    }

    #[test]
    fn rejects_bad_addresses() {
        let config = SessionConfig::default();
        assert!(BrokerEndpoint::parse("host:notaport", &config).is_err());
        assert!(BrokerEndpoint::parse("mqtt://:8883", &config).is_err());
        assert!(BrokerEndpoint::parse("", &config).is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_keeps_host_and_port(
            host in "[a-z][a-z0-9.-]{0,20}",
            port in any::<u16>(),
            scheme in prop::option::of("(tcp|ssl|mqtt)"),
            production in any::<bool>(),
        ) {
            let config = SessionConfig { production, ..SessionConfig::test() };
            let prefix = scheme.map(|s| format!("{s}://")).unwrap_or_default();

            let explicit = BrokerEndpoint::parse(&format!("{prefix}{host}:{port}"), &config).unwrap();
            prop_assert_eq!(&explicit.host, &host);
            prop_assert_eq!(explicit.port, port);
            prop_assert_eq!(explicit.tls, production);

            let bare = BrokerEndpoint::parse(&format!("{prefix}{host}"), &config).unwrap();
            prop_assert_eq!(bare.host, host);
            prop_assert_eq!(bare.port, config.default_port());
        }
    }
}
