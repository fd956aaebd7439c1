//! Functions for performing DNS lookups (MX records).

use crate::config::Config;
use crate::error::{AppError, Result};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use trust_dns_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// A single mail exchanger for a domain.
#[derive(Debug, Clone)]
pub(crate) struct MailServer {
    /// The domain name of the mail server.
    pub exchange: String,
    /// The preference value (lower is more preferred).
    pub preference: u16,
}

/// Creates a configured DNS resolver instance.
pub(crate) fn create_resolver(config: &Config) -> Result<TokioAsyncResolver> {
    let mut resolver_config = ResolverConfig::new();

    for server_str in &config.dns_servers {
        match IpAddr::from_str(server_str) {
            Ok(ip_addr) => {
                let socket_addr = SocketAddr::new(ip_addr, 53);
                resolver_config.add_name_server(trust_dns_resolver::config::NameServerConfig {
                    socket_addr,
                    protocol: trust_dns_resolver::config::Protocol::Udp,
                    tls_dns_name: None,
                    trust_negative_responses: true,
                    bind_addr: None,
                });
                resolver_config.add_name_server(trust_dns_resolver::config::NameServerConfig {
                    socket_addr,
                    protocol: trust_dns_resolver::config::Protocol::Tcp,
                    tls_dns_name: None,
                    trust_negative_responses: true,
                    bind_addr: None,
                });
            }
            Err(e) => {
                tracing::error!(
                    "Invalid DNS server IP address in config: '{}' - {}",
                    server_str,
                    e
                );
                return Err(AppError::Config(format!(
                    "Invalid DNS server IP address: {}",
                    server_str
                )));
            }
        }
    }

    let mut resolver_opts = ResolverOpts::default();
    resolver_opts.timeout = config.dns_timeout;
    resolver_opts.attempts = 2;
    resolver_opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

    let resolver = TokioAsyncResolver::tokio(resolver_config, resolver_opts);
    tracing::debug!("DNS resolver configured with public servers and timeout.");
    Ok(resolver)
}

/// Resolves the MX records for a domain, sorted by preference (most
/// preferred first).
///
/// Returns `Ok(vec![])` when the lookup succeeded but the domain
/// publishes no MX records; other resolution failures (NXDOMAIN, timeout,
/// server failure) surface as `Err`.
pub(crate) async fn resolve_mx(
    resolver: &TokioAsyncResolver,
    domain: &str,
) -> Result<Vec<MailServer>> {
    tracing::debug!("Performing DNS MX lookup for {}", domain);

    match resolver.mx_lookup(domain).await {
        Ok(mx_response) => {
            let mut servers: Vec<MailServer> = mx_response
                .iter()
                .filter_map(|record| {
                    let exchange = record.exchange().to_utf8().trim_end_matches('.').to_string();
                    if exchange.is_empty() {
                        None
                    } else {
                        Some(MailServer {
                            exchange,
                            preference: record.preference(),
                        })
                    }
                })
                .collect();
            servers.sort_by_key(|s| s.preference);
            if let Some(best) = servers.first() {
                tracing::debug!(
                    "Found MX for {}: {} (Pref: {})",
                    domain,
                    best.exchange,
                    best.preference
                );
            }
            Ok(servers)
        }
        Err(e) => {
            let error_string = format!("{:?}", e.kind());
            if error_string.contains("NoRecordsFound") && !error_string.contains("NXDomain") {
                tracing::debug!("No MX records found (NoAnswer) for {}", domain);
                Ok(Vec::new())
            } else {
                tracing::warn!("MX resolution failed for {}: {}", domain, e);
                Err(AppError::Dns(e))
            }
        }
    }
}
