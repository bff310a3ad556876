#![forbid(unsafe_code)]

pub mod bind {
	use std::net::{IpAddr, SocketAddr};

	use url::{Host, Url};

	#[derive(Debug, thiserror::Error, PartialEq, Eq)]
	pub enum BindError {
		#[error("invalid bind url {input:?}: {source}")]
		Url { input: String, source: url::ParseError },

		#[error("bind url must use the ws scheme, got {0:?}")]
		Scheme(String),

		#[error("bind url must not carry a path, query or fragment: {0}")]
		Extra(String),

		#[error("bind host must be an IP literal (DNS names are not bound): {0}")]
		NotIpLiteral(String),

		#[error("bind port must be in 1..=65535: {0}")]
		Port(String),
	}

	/// Socket address for a `ws://ip:port` presentation bind.
	///
	/// A missing port falls back to the scheme default (80). IPv6 hosts are
	/// bracketed as in any URL (`ws://[::1]:8765`).
	pub fn parse_ws_bind(input: &str) -> Result<SocketAddr, BindError> {
		let input = input.trim();
		let url = Url::parse(input).map_err(|source| BindError::Url {
			input: input.to_string(),
			source,
		})?;

		if url.scheme() != "ws" {
			return Err(BindError::Scheme(url.scheme().to_string()));
		}
		if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
			return Err(BindError::Extra(input.to_string()));
		}

		let ip = match url.host() {
			Some(Host::Ipv4(v4)) => IpAddr::V4(v4),
			Some(Host::Ipv6(v6)) => IpAddr::V6(v6),
			Some(Host::Domain(d)) => return Err(BindError::NotIpLiteral(d.to_string())),
			None => return Err(BindError::NotIpLiteral(input.to_string())),
		};

		match url.port_or_known_default() {
			Some(port) if port != 0 => Ok(SocketAddr::new(ip, port)),
			_ => Err(BindError::Port(input.to_string())),
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn ip_literals_bind() {
			assert_eq!(parse_ws_bind("ws://127.0.0.1:8765").unwrap().to_string(), "127.0.0.1:8765");
			assert_eq!(parse_ws_bind(" ws://[::1]:8765/ ").unwrap().to_string(), "[::1]:8765");
			assert_eq!(parse_ws_bind("ws://0.0.0.0").unwrap().port(), 80);
		}

		#[test]
		fn wrong_scheme_or_extras_are_rejected() {
			assert!(matches!(parse_ws_bind("wss://127.0.0.1:8765"), Err(BindError::Scheme(_))));
			assert!(matches!(parse_ws_bind("quic://127.0.0.1:8765"), Err(BindError::Scheme(_))));
			assert!(matches!(parse_ws_bind("ws://127.0.0.1:8765/overlay"), Err(BindError::Extra(_))));
			assert!(matches!(parse_ws_bind("ws://127.0.0.1:8765?x=1"), Err(BindError::Extra(_))));
		}

		#[test]
		fn hosts_and_ports_are_checked() {
			assert!(matches!(parse_ws_bind("ws://::1:8765"), Err(BindError::Url { .. })));
			assert!(matches!(parse_ws_bind("ws://overlay.local:8765"), Err(BindError::NotIpLiteral(_))));
			assert!(matches!(parse_ws_bind("ws://127.0.0.1:0"), Err(BindError::Port(_))));
			assert!(parse_ws_bind("ws://127.0.0.1:70000").is_err());
			assert!(parse_ws_bind("").is_err());
		}
	}
}

pub mod time {
	use std::time::SystemTime;

	use chrono::{DateTime, Utc};

	/// Current Unix time in milliseconds.
	pub fn unix_ms_now() -> i64 {
		Utc::now().timestamp_millis()
	}

	/// Unix milliseconds for a `SystemTime`; negative before the epoch.
	pub fn unix_ms(t: SystemTime) -> i64 {
		DateTime::<Utc>::from(t).timestamp_millis()
	}

}
