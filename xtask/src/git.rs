use anyhow::{Context, Result};
use esp_idf_bindings::EspIdfVersion;

/// The release versions tagged in `repository`.
pub fn release_versions(repository: &str) -> Result<Vec<EspIdfVersion>> {
    log::info!("Fetching ESP-IDF versions from {repository}");

    let tags = embuild::cmd!("git", "ls-remote", "--tags", repository)
        .stdout()
        .context("Failed to run `git ls-remote`")?;

    let versions = EspIdfVersion::from_git_tags(&tags);
    log::info!("Found {} releases", versions.len());

    Ok(versions)
}
