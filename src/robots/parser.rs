//! Robots.txt parsing
//!
//! Wraps the robotstxt crate's matcher and adds the directives it does not
//! surface: Crawl-delay and the raw Disallow path list.

use robotstxt::DefaultMatcher;

/// Parsed robots.txt data for one host
#[derive(Debug, Clone, PartialEq)]
enum Mode {
    /// Evaluate the stored content per request
    Content,
    /// No policy (404 or empty); everything allowed
    AllowAll,
    /// Ambiguous fetch failure; everything disallowed
    DenyAll,
}

/// Parsed robots.txt content
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    content: String,
    mode: Mode,
}

impl ParsedRobots {
    /// Creates a ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            mode: Mode::Content,
        }
    }

    /// A permissive record: site has no robots policy
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            mode: Mode::AllowAll,
        }
    }

    /// A closed record: robots.txt could not be fetched unambiguously
    pub fn deny_all() -> Self {
        Self {
            content: String::new(),
            mode: Mode::DenyAll,
        }
    }

    /// Checks if a path is allowed for the given user agent
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        match self.mode {
            Mode::AllowAll => true,
            Mode::DenyAll => false,
            Mode::Content => {
                if self.content.is_empty() {
                    return true;
                }
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(&self.content, user_agent, path)
            }
        }
    }

    /// Gets the crawl delay in seconds for a user agent, if any
    ///
    /// The robotstxt crate ignores Crawl-delay, so it is parsed by hand:
    /// the directive applies to the most recent User-agent group, and a
    /// group naming the agent specifically wins over the wildcard group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        if self.mode != Mode::Content || self.content.is_empty() {
            return None;
        }

        let normalized_agent = user_agent.to_lowercase();
        let mut current_agents: Vec<String> = Vec::new();
        let mut wildcard_delay: Option<f64> = None;
        let mut agent_delay: Option<f64> = None;

        for line in self.content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "user-agent" => {
                    current_agents.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    if let Ok(delay) = value.parse::<f64>() {
                        if current_agents
                            .iter()
                            .any(|ua| ua == "*" || normalized_agent.contains(ua.as_str()))
                        {
                            if current_agents.iter().any(|ua| ua == "*") {
                                wildcard_delay = Some(delay);
                            } else {
                                agent_delay = Some(delay);
                            }
                        }
                    }
                    current_agents.clear();
                }
                _ => {}
            }
        }

        agent_delay.or(wildcard_delay)
    }

    /// Returns the Disallow path prefixes that apply to everyone
    ///
    /// Used only for record inspection and logging; admission checks go
    /// through [`Self::is_allowed`], which honors Allow overrides.
    pub fn disallowed_paths(&self) -> Vec<String> {
        if self.mode != Mode::Content {
            return Vec::new();
        }
        self.content
            .lines()
            .filter_map(|line| {
                let trimmed = line.trim();
                let (key, value) = trimmed.split_once(':')?;
                if key.trim().eq_ignore_ascii_case("disallow") && !value.trim().is_empty() {
                    Some(value.trim().to_string())
                } else {
                    None
                }
            })
            .collect()
    }
}
