use url::Url;

use crate::error::AppError;

/// `{owner, name}` pair identifying a repository at the source host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocator {
    pub owner: String,
    pub name: String,
}

/// Parse a public repository URL into its locator. Accepts plain, `.git`
/// suffixed and deep-link forms.
pub fn parse_repo_url(source_url: &str) -> Result<RepoLocator, AppError> {
    let parsed =
        Url::parse(source_url).map_err(|e| AppError::InvalidUrl(format!("{source_url}: {e}")))?;

    if parsed.host_str() != Some("github.com") && parsed.host_str() != Some("www.github.com") {
        return Err(AppError::InvalidUrl(format!(
            "{source_url}: expected a github.com repository"
        )));
    }

    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| AppError::InvalidUrl(source_url.to_string()))?
        .filter(|s| !s.is_empty());

    let owner = segments
        .next()
        .ok_or_else(|| AppError::InvalidUrl(format!("{source_url}: missing owner")))?
        .to_string();
    let name = segments
        .next()
        .ok_or_else(|| AppError::InvalidUrl(format!("{source_url}: missing repository name")))?
        .trim_end_matches(".git")
        .to_string();

    if owner.is_empty() || name.is_empty() {
        return Err(AppError::InvalidUrl(source_url.to_string()));
    }

    Ok(RepoLocator { owner, name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_git_suffixed_urls() {
        let locator = parse_repo_url("https://github.com/acme/widget").expect("plain url");
        assert_eq!(locator.owner, "acme");
        assert_eq!(locator.name, "widget");

        let locator = parse_repo_url("https://github.com/acme/widget.git").expect("git url");
        assert_eq!(locator.name, "widget");

        let locator =
            parse_repo_url("https://github.com/acme/widget/tree/main/src").expect("deep url");
        assert_eq!(locator.name, "widget");
    }

    #[test]
    fn rejects_non_github_and_malformed_urls() {
        assert!(matches!(
            parse_repo_url("https://gitlab.com/acme/widget"),
            Err(AppError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_repo_url("not a url"),
            Err(AppError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_repo_url("https://github.com/acme"),
            Err(AppError::InvalidUrl(_))
        ));
    }
}
