//! Defines the configuration settings for the lead-sleuth application.

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::models::JobConfig;

/// Command line arguments for lead-sleuth
#[derive(Parser, Debug)]
#[command(author, version, about = "Sector-driven lead generation: search, scrape, score and verify company leads", long_about = None)]
pub(crate) struct AppArgs {
    /// Path to the output JSON file where surviving leads are saved
    #[arg(short, long, default_value = "leads.json", env = "LEAD_SLEUTH_OUTPUT")]
    pub output: String,

    /// Tenant identifier for this run
    #[arg(long, default_value = "cli", env = "LEAD_SLEUTH_TENANT")]
    pub tenant: String,

    /// List identifier leads are attached to
    #[arg(long, default_value = "default", env = "LEAD_SLEUTH_LIST")]
    pub list_id: String,

    /// Analyzer use case (erp, recruitment)
    #[arg(long, default_value = "erp", env = "LEAD_SLEUTH_USE_CASE")]
    pub use_case: String,

    /// Comma-separated sector keys (empty = all)
    #[arg(long, env = "LEAD_SLEUTH_SECTORS")]
    pub sectors: Option<String>,

    /// Comma-separated country keys (empty = all)
    #[arg(long, env = "LEAD_SLEUTH_COUNTRIES")]
    pub countries: Option<String>,

    /// Stop once this many leads have been persisted
    #[arg(long, env = "LEAD_SLEUTH_TARGET_LEADS")]
    pub target_leads: Option<usize>,

    /// Drop leads scoring below this threshold (0-100)
    #[arg(long, env = "LEAD_SLEUTH_MIN_SCORE")]
    pub min_score: Option<u8>,

    /// Per-job fetcher parallelism
    #[arg(short, long, env = "LEAD_SLEUTH_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Skip email validation entirely
    #[arg(long, default_value = "false", env = "LEAD_SLEUTH_NO_EMAIL_VALIDATION")]
    pub no_email_validation: bool,

    /// Probe mailboxes over SMTP (requires outbound port 25)
    #[arg(long, default_value = "false", env = "LEAD_SLEUTH_DEEP_VALIDATION")]
    pub deep_validation: bool,

    /// Search via plain HTTP instead of the headless browser
    #[arg(long, default_value = "false", env = "LEAD_SLEUTH_NO_BROWSER")]
    pub no_browser: bool,

    /// Path to configuration file (TOML format)
    #[arg(long, env = "LEAD_SLEUTH_CONFIG")]
    pub config_file: Option<String>,

    /// Path to the ERP sectors JSON file
    #[arg(long, env = "LEAD_SLEUTH_SECTORS_FILE")]
    pub sectors_file: Option<String>,

    /// Maximum result URLs kept per search query
    #[arg(long, env = "LEAD_SLEUTH_MAX_SEARCH_RESULTS")]
    pub max_search_results: Option<usize>,

    /// User agent string for HTTP requests
    #[arg(long, env = "LEAD_SLEUTH_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Sender email address for the SMTP probe
    #[arg(long, env = "LEAD_SLEUTH_SMTP_SENDER")]
    pub smtp_sender: Option<String>,

    /// Comma-separated list of DNS servers
    #[arg(long, env = "LEAD_SLEUTH_DNS_SERVERS")]
    pub dns_servers: Option<String>,

    /// Homepage request timeout in seconds
    #[arg(long, env = "LEAD_SLEUTH_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// SMTP probe timeout in seconds
    #[arg(long, env = "LEAD_SLEUTH_SMTP_TIMEOUT")]
    pub smtp_timeout: Option<u64>,

    /// DNS resolution timeout in seconds
    #[arg(long, env = "LEAD_SLEUTH_DNS_TIMEOUT")]
    pub dns_timeout: Option<u64>,

    /// Minimum sleep between HTTP requests (seconds)
    #[arg(long, env = "LEAD_SLEUTH_MIN_SLEEP")]
    pub min_sleep: Option<f32>,

    /// Maximum sleep between HTTP requests (seconds)
    #[arg(long, env = "LEAD_SLEUTH_MAX_SLEEP")]
    pub max_sleep: Option<f32>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    network: Option<NetworkSection>,
    search: Option<SearchSection>,
    dns: Option<DnsSection>,
    smtp: Option<SmtpSection>,
    job: Option<JobSection>,
    input_output: Option<InputOutputSection>,
}

#[derive(Deserialize, Debug, Default)]
struct NetworkSection {
    request_timeout: Option<u64>,
    contact_page_timeout: Option<u64>,
    vacancy_page_timeout: Option<u64>,
    min_sleep: Option<f32>,
    max_sleep: Option<f32>,
    user_agent: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct SearchSection {
    search_timeout: Option<u64>,
    selector_timeout: Option<u64>,
    max_results: Option<usize>,
    page_pool_size: Option<usize>,
    min_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    endpoint: Option<String>,
    html_endpoint: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct DnsSection {
    dns_timeout: Option<u64>,
    dns_servers: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct SmtpSection {
    smtp_timeout: Option<u64>,
    smtp_sender_email: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct JobSection {
    target_leads: Option<usize>,
    sector_keys: Option<Vec<String>>,
    country_keys: Option<Vec<String>>,
    min_score: Option<u8>,
    email_validation: Option<bool>,
    deep_validation: Option<bool>,
    concurrency: Option<usize>,
    use_browser: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
struct InputOutputSection {
    output_file: Option<String>,
    sectors_file: Option<String>,
}

/// Application configuration settings.
///
/// Ambient knobs live here; the per-job options live in [`JobConfig`]
/// (`self.job` holds the job config assembled from file + CLI for the
/// binary run).
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Path to the output JSON file where leads are saved.
    pub output_file: String,
    /// Tenant identifier used by the CLI run.
    pub tenant: String,
    /// List identifier used by the CLI run.
    pub list_id: String,
    /// Analyzer use case selected for the CLI run.
    pub use_case: String,
    /// Per-job options for the CLI run.
    pub job: JobConfig,
    /// Timeout for the homepage fetch.
    pub request_timeout: Duration,
    /// Timeout for contact-page fetches.
    pub contact_page_timeout: Duration,
    /// Timeout for analyzer extra-crawl fetches (vacancy pages).
    pub vacancy_page_timeout: Duration,
    /// Navigation timeout for a single browser search.
    pub search_timeout: Duration,
    /// Per-selector wait budget in the result cascade.
    pub selector_timeout: Duration,
    /// Timeout for DNS resolution queries.
    pub dns_timeout: Duration,
    /// Overall budget for the SMTP probe.
    pub smtp_timeout: Duration,
    /// DNS servers to use for resolution.
    pub dns_servers: Vec<String>,
    /// Sender address used in the SMTP MAIL FROM command.
    pub smtp_sender_email: String,
    /// Maximum result URLs kept per search query.
    pub max_search_results: usize,
    /// Maximum reusable browser tabs.
    pub page_pool_size: usize,
    /// Browser search endpoint.
    pub search_endpoint: String,
    /// HTTP fallback endpoint (form POST).
    pub search_html_endpoint: String,
    /// Floor of the adaptive inter-search delay.
    pub min_search_delay_ms: u64,
    /// Cap of the adaptive inter-search delay.
    pub max_search_delay_ms: u64,
    /// Minimum and maximum sleep between plain HTTP requests (seconds).
    pub sleep_between_requests: (f32, f32),
    /// User agent string for HTTP requests and the browser.
    pub user_agent: String,
    /// Path to the ERP sectors JSON file, if any.
    pub sectors_file: Option<String>,
}

impl Config {
    pub(crate) fn default_config() -> Self {
        Config {
            output_file: "leads.json".to_string(),
            tenant: "cli".to_string(),
            list_id: "default".to_string(),
            use_case: "erp".to_string(),
            job: JobConfig::default(),
            request_timeout: Duration::from_secs(12),
            contact_page_timeout: Duration::from_secs(8),
            vacancy_page_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(25),
            selector_timeout: Duration::from_secs(4),
            dns_timeout: Duration::from_secs(5),
            smtp_timeout: Duration::from_secs(5),
            dns_servers: vec![
                "8.8.8.8".to_string(),
                "8.8.4.4".to_string(),
                "1.1.1.1".to_string(),
                "1.0.0.1".to_string(),
            ],
            smtp_sender_email: "verify-probe@example.com".to_string(),
            max_search_results: 30,
            page_pool_size: 5,
            search_endpoint: "https://duckduckgo.com/".to_string(),
            search_html_endpoint: "https://html.duckduckgo.com/html/".to_string(),
            min_search_delay_ms: 1500,
            max_search_delay_ms: 60_000,
            sleep_between_requests: (0.1, 0.5),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            sectors_file: None,
        }
    }

    /// Random sleep inside the configured inter-request range.
    pub(crate) fn random_sleep_duration(&self) -> Duration {
        use rand::Rng;
        let (min, max) = self.sleep_between_requests;
        if min >= max {
            return Duration::from_secs_f32(min);
        }
        let secs = rand::thread_rng().gen_range(min..max);
        Duration::from_secs_f32(secs)
    }
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!("Loaded configuration from {}", file_path);
    Ok(config)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    if let Some(network) = &file_config.network {
        if let Some(timeout) = network.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(timeout) = network.contact_page_timeout {
            config.contact_page_timeout = Duration::from_secs(timeout);
        }
        if let Some(timeout) = network.vacancy_page_timeout {
            config.vacancy_page_timeout = Duration::from_secs(timeout);
        }
        if let Some(min_sleep) = network.min_sleep {
            config.sleep_between_requests.0 = min_sleep;
        }
        if let Some(max_sleep) = network.max_sleep {
            config.sleep_between_requests.1 = max_sleep;
        }
        if let Some(user_agent) = &network.user_agent {
            config.user_agent = user_agent.clone();
        }
    }

    if let Some(search) = &file_config.search {
        if let Some(timeout) = search.search_timeout {
            config.search_timeout = Duration::from_secs(timeout);
        }
        if let Some(timeout) = search.selector_timeout {
            config.selector_timeout = Duration::from_secs(timeout);
        }
        if let Some(max_results) = search.max_results {
            config.max_search_results = max_results;
        }
        if let Some(pool) = search.page_pool_size {
            config.page_pool_size = pool;
        }
        if let Some(delay) = search.min_delay_ms {
            config.min_search_delay_ms = delay;
        }
        if let Some(delay) = search.max_delay_ms {
            config.max_search_delay_ms = delay;
        }
        if let Some(endpoint) = &search.endpoint {
            config.search_endpoint = endpoint.clone();
        }
        if let Some(endpoint) = &search.html_endpoint {
            config.search_html_endpoint = endpoint.clone();
        }
    }

    if let Some(dns) = &file_config.dns {
        if let Some(timeout) = dns.dns_timeout {
            config.dns_timeout = Duration::from_secs(timeout);
        }
        if let Some(servers) = &dns.dns_servers {
            config.dns_servers = servers.clone();
        }
    }

    if let Some(smtp) = &file_config.smtp {
        if let Some(timeout) = smtp.smtp_timeout {
            config.smtp_timeout = Duration::from_secs(timeout);
        }
        if let Some(sender) = &smtp.smtp_sender_email {
            config.smtp_sender_email = sender.clone();
        }
    }

    if let Some(job) = &file_config.job {
        if let Some(target) = job.target_leads {
            config.job.target_leads = target;
        }
        if let Some(sectors) = &job.sector_keys {
            config.job.sector_keys = sectors.clone();
        }
        if let Some(countries) = &job.country_keys {
            config.job.country_keys = countries.clone();
        }
        if let Some(min_score) = job.min_score {
            config.job.min_score = min_score;
        }
        if let Some(validate) = job.email_validation {
            config.job.email_validation = validate;
        }
        if let Some(deep) = job.deep_validation {
            config.job.deep_validation = deep;
        }
        if let Some(concurrency) = job.concurrency {
            config.job.concurrency = concurrency;
        }
        if let Some(use_browser) = job.use_browser {
            config.job.use_browser = use_browser;
        }
    }

    if let Some(io_config) = &file_config.input_output {
        if let Some(output) = &io_config.output_file {
            config.output_file = output.clone();
        }
        if let Some(sectors) = &io_config.sectors_file {
            config.sectors_file = Some(sectors.clone());
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &AppArgs) {
    config.output_file = args.output.clone();
    config.tenant = args.tenant.clone();
    config.list_id = args.list_id.clone();
    config.use_case = args.use_case.to_lowercase();

    if let Some(ref sectors) = args.sectors {
        config.job.sector_keys = split_csv(sectors);
    }
    if let Some(ref countries) = args.countries {
        config.job.country_keys = split_csv(countries);
    }
    if let Some(target) = args.target_leads {
        config.job.target_leads = target;
    }
    if let Some(min_score) = args.min_score {
        config.job.min_score = min_score;
    }
    if let Some(concurrency) = args.concurrency {
        config.job.concurrency = concurrency;
    }
    if args.no_email_validation {
        config.job.email_validation = false;
    }
    if args.deep_validation {
        config.job.deep_validation = true;
    }
    if args.no_browser {
        config.job.use_browser = false;
    }

    if let Some(max_results) = args.max_search_results {
        config.max_search_results = max_results;
    }
    if let Some(ref agent) = args.user_agent {
        config.user_agent = agent.clone();
    }
    if let Some(ref sender) = args.smtp_sender {
        config.smtp_sender_email = sender.clone();
    }
    if let Some(ref servers) = args.dns_servers {
        config.dns_servers = servers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }
    if let Some(timeout) = args.smtp_timeout {
        config.smtp_timeout = Duration::from_secs(timeout);
    }
    if let Some(timeout) = args.dns_timeout {
        config.dns_timeout = Duration::from_secs(timeout);
    }
    if let Some(min_sleep) = args.min_sleep {
        config.sleep_between_requests.0 = min_sleep;
    }
    if let Some(max_sleep) = args.max_sleep {
        config.sleep_between_requests.1 = max_sleep;
    }
    if let Some(ref sectors_file) = args.sectors_file {
        config.sectors_file = Some(sectors_file.clone());
    }
}

fn validate_config(config: &mut Config) -> anyhow::Result<()> {
    if config.sleep_between_requests.0 > config.sleep_between_requests.1 {
        config.sleep_between_requests.1 = config.sleep_between_requests.0;
        tracing::warn!(
            "Min sleep was greater than max sleep. Setting both to {}",
            config.sleep_between_requests.0
        );
    }

    if config.dns_servers.is_empty() {
        config.dns_servers = vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()];
        tracing::warn!("DNS servers list was empty. Setting to default public DNS servers.");
    }

    if config.job.min_score > 100 {
        config.job.min_score = 100;
        tracing::warn!("Minimum score exceeded maximum (100). Setting to 100.");
    }

    if config.job.concurrency == 0 {
        config.job.concurrency = 1;
        tracing::warn!("Concurrency was set to 0. Setting to 1.");
    }

    if config.page_pool_size == 0 {
        config.page_pool_size = 1;
        tracing::warn!("Page pool size was set to 0. Setting to 1.");
    }

    if config.min_search_delay_ms > config.max_search_delay_ms {
        config.max_search_delay_ms = config.min_search_delay_ms;
        tracing::warn!(
            "Minimum search delay exceeded the cap. Raising cap to {} ms",
            config.min_search_delay_ms
        );
    }

    Ok(())
}

pub(crate) fn build_config() -> anyhow::Result<Config> {
    let args = AppArgs::parse();

    let mut config = Config::default_config();

    if let Some(ref file_path) = args.config_file {
        match load_config_file(file_path) {
            Ok(file_config) => apply_file_config(&mut config, &file_config),
            Err(e) => {
                tracing::error!("Failed to load configuration file: {}", e);
            }
        }
    } else {
        for path in ["./lead-sleuth.toml", "./config.toml"].iter() {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, &args);

    validate_config(&mut config)?;

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default_config();
        assert_eq!(config.request_timeout, Duration::from_secs(12));
        assert_eq!(config.contact_page_timeout, Duration::from_secs(8));
        assert_eq!(config.search_timeout, Duration::from_secs(25));
        assert_eq!(config.page_pool_size, 5);
        assert_eq!(config.min_search_delay_ms, 1500);
        assert_eq!(config.max_search_delay_ms, 60_000);
    }

    #[test]
    fn file_config_overrides_defaults() {
        let mut config = Config::default_config();
        let file_config: ConfigFile = toml::from_str(
            r#"
            [search]
            max_results = 10
            page_pool_size = 2

            [job]
            min_score = 70
            use_browser = false
            "#,
        )
        .unwrap();
        apply_file_config(&mut config, &file_config);
        assert_eq!(config.max_search_results, 10);
        assert_eq!(config.page_pool_size, 2);
        assert_eq!(config.job.min_score, 70);
        assert!(!config.job.use_browser);
    }

    #[test]
    fn validation_clamps_bad_values() {
        let mut config = Config::default_config();
        config.job.concurrency = 0;
        config.job.min_score = 250;
        config.sleep_between_requests = (2.0, 1.0);
        validate_config(&mut config).unwrap();
        assert_eq!(config.job.concurrency, 1);
        assert_eq!(config.job.min_score, 100);
        assert_eq!(config.sleep_between_requests.1, 2.0);
    }
}
