use std::path::Path;

use anyhow::{Context, bail};
use indoc::indoc;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse configuration from {}", path.display()))?;

    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.auth.proxy_api_key.is_none() {
        bail!(indoc! {r#"
            No proxy API key configured. Clients authenticate to Luthien with this key;
            the gateway refuses to start without one.

            Example configuration:

              [auth]
              proxy_api_key = "your-secret-key"
        "#});
    }

    if config.upstream.providers.is_empty() {
        bail!(indoc! {r#"
            No upstream providers configured. Luthien requires at least one provider to
            route requests to.

            Example configuration:

              [upstream.providers.openai]
              model_pattern = "^gpt-"
              base_url = "https://api.openai.com/v1"
              credentials_ref = "OPENAI_API_KEY"
              dialect = "openai"
        "#});
    }

    for (name, provider) in &config.upstream.providers {
        if provider.base_url.trim().is_empty() {
            bail!("Provider '{name}' has an empty base_url");
        }
    }

    if config.queues.capacity == 0 {
        bail!("queues.capacity must be at least 1");
    }

    if config.limits.stall_threshold_ms > config.limits.overall_deadline_ms {
        log::warn!(
            "limits.stall_threshold_ms ({}) exceeds limits.overall_deadline_ms ({}); the overall deadline will always fire first",
            config.limits.stall_threshold_ms,
            config.limits.overall_deadline_ms
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;
    use std::io::Write;

    use crate::Config;

    const MINIMAL: &str = indoc! {r#"
        [auth]
        proxy_api_key = "secret"

        [upstream.providers.openai]
        model_pattern = "^gpt-"
        base_url = "https://api.openai.com/v1"
        credentials_ref = "OPENAI_API_KEY"
        dialect = "openai"
    "#};

    #[test]
    fn minimal_config_validates() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        super::validate(&config).unwrap();
    }

    #[test]
    fn missing_api_key_fails_validation() {
        let config: Config = toml::from_str(indoc! {r#"
            [upstream.providers.openai]
            model_pattern = "^gpt-"
            base_url = "https://api.openai.com/v1"
            dialect = "openai"
        "#})
        .unwrap();

        let error = super::validate(&config).unwrap_err().to_string();

        assert_snapshot!(error, @r#"
        No proxy API key configured. Clients authenticate to Luthien with this key;
        the gateway refuses to start without one.

        Example configuration:

          [auth]
          proxy_api_key = "your-secret-key"
        "#);
    }

    #[test]
    fn missing_providers_fails_validation() {
        let config: Config = toml::from_str(indoc! {r#"
            [auth]
            proxy_api_key = "secret"
        "#})
        .unwrap();

        let error = super::validate(&config).unwrap_err().to_string();

        assert_snapshot!(error, @r#"
        No upstream providers configured. Luthien requires at least one provider to
        route requests to.

        Example configuration:

          [upstream.providers.openai]
          model_pattern = "^gpt-"
          base_url = "https://api.openai.com/v1"
          credentials_ref = "OPENAI_API_KEY"
          dialect = "openai"
        "#);
    }

    #[test]
    fn zero_queue_capacity_fails_validation() {
        let toml = format!("{MINIMAL}\n[queues]\ncapacity = 0\n");
        let config: Config = toml::from_str(&toml).unwrap();

        let error = super::validate(&config).unwrap_err().to_string();
        assert_snapshot!(error, @"queues.capacity must be at least 1");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = super::load(file.path()).unwrap();
        assert_eq!(config.upstream.providers.len(), 1);
    }

    #[test]
    fn load_surfaces_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(format!("{MINIMAL}\n[metrics]\nenabled = true\n").as_bytes())
            .unwrap();

        let error = super::load(file.path()).unwrap_err();
        assert!(format!("{error:#}").contains("unknown field `metrics`"));
    }
}
