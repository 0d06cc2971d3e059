//! Reader URI grammar: `scheme://[host[:port]][/path]`.

use crate::error::{Error, Result};

/// Which protocol family a URI selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderScheme {
    /// `eapi:///<device-path>` or `tmr:///<device-path>`: local serial.
    Serial { device_path: String },
    /// `rql://<host>[:port]`: RQL text protocol (default port 8080).
    Rql { host: String, port: u16 },
    /// `llrp://<host>[:port]`: LLRP binary protocol.
    Llrp { host: String, port: u16 },
    /// `tmr://<host>[:port]`: ambiguous; dispatch probes LLRP, falling back
    /// to RQL. See `ReaderCore::from_uri` for the resolved policy.
    TmrNetwork { host: String, port: Option<u16> },
}

const DEFAULT_RQL_PORT: u16 = 8080;
const DEFAULT_LLRP_PORT: u16 = 5084;

/// Parse a reader URI into its scheme and addressing parts.
///
/// Grammar: `scheme://[host[:port]][/path]`. An empty or missing authority
/// with a non-empty path is a device path (serial); any other scheme not in
/// {eapi, tmr, rql, llrp} fails with [`Error::InvalidUri`].
pub fn parse(uri: &str) -> Result<ReaderScheme> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| Error::InvalidUri(format!("missing scheme separator in '{uri}'")))?;

    match scheme {
        "eapi" => Ok(ReaderScheme::Serial {
            device_path: device_path(rest)?,
        }),
        "tmr" => {
            if rest.starts_with('/') || rest.is_empty() {
                Ok(ReaderScheme::Serial {
                    device_path: device_path(rest)?,
                })
            } else {
                let (host, port) = split_authority(rest)?;
                Ok(ReaderScheme::TmrNetwork { host, port })
            }
        }
        "rql" => {
            let (host, port) = split_authority(rest)?;
            Ok(ReaderScheme::Rql {
                host,
                port: port.unwrap_or(DEFAULT_RQL_PORT),
            })
        }
        "llrp" => {
            let (host, port) = split_authority(rest)?;
            Ok(ReaderScheme::Llrp {
                host,
                port: port.unwrap_or(DEFAULT_LLRP_PORT),
            })
        }
        other => Err(Error::InvalidUri(format!("unknown scheme '{other}'"))),
    }
}

fn device_path(rest: &str) -> Result<String> {
    let trimmed = rest.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidUri("serial URI carries no device path".into()));
    }
    Ok(format!("/{trimmed}"))
}

fn split_authority(rest: &str) -> Result<(String, Option<u16>)> {
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(Error::InvalidUri("missing host in network URI".into()));
    }
    match authority.split_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| Error::InvalidUri(format!("invalid port '{port_str}'")))?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((authority.to_string(), None)),
    }
}
