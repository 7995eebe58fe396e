//! Resource-class TTL policy for cached responses.

use chrono::Duration;

use crate::config::TtlConfig;

/// Resource classes with distinct cache lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Profiles, stats, achievements
  Profile,
  /// Stories, chapters, episodes
  Story,
  Notifications,
  /// Reading progress
  Progress,
  /// Anything else
  Other,
}

impl ResourceClass {
  /// Classify a request url. More specific classes are checked first, so
  /// `/stories/42/progress` is progress rather than story content and
  /// `/users/7/stories` is story content rather than profile.
  pub fn classify(url: &str) -> Self {
    let path = url
      .split(['?', '#'])
      .next()
      .unwrap_or_default()
      .to_lowercase();

    if path.contains("notification") {
      Self::Notifications
    } else if path.contains("progress") || path.contains("/reading") {
      Self::Progress
    } else if ["/stories", "/chapters", "/episodes"]
      .iter()
      .any(|p| path.contains(p))
    {
      Self::Story
    } else if ["/profile", "/users", "/stats", "/achievements"]
      .iter()
      .any(|p| path.contains(p))
    {
      Self::Profile
    } else {
      Self::Other
    }
  }
}

/// TTL per resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
  pub profile: Duration,
  pub story: Duration,
  pub notifications: Duration,
  pub progress: Duration,
  pub other: Duration,
}

impl Default for TtlPolicy {
  fn default() -> Self {
    Self::from_config(&TtlConfig::default())
  }
}

impl TtlPolicy {
  pub fn from_config(config: &TtlConfig) -> Self {
    let secs = |s: u64| Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX).min(i64::MAX / 1_000));
    Self {
      profile: secs(config.profile_secs),
      story: secs(config.story_secs),
      notifications: secs(config.notifications_secs),
      progress: secs(config.progress_secs),
      other: secs(config.default_secs),
    }
  }

  pub fn ttl_for_class(&self, class: ResourceClass) -> Duration {
    match class {
      ResourceClass::Profile => self.profile,
      ResourceClass::Story => self.story,
      ResourceClass::Notifications => self.notifications,
      ResourceClass::Progress => self.progress,
      ResourceClass::Other => self.other,
    }
  }

  pub fn ttl_for(&self, url: &str) -> Duration {
    self.ttl_for_class(ResourceClass::classify(url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify() {
    assert_eq!(ResourceClass::classify("/users/profile"), ResourceClass::Profile);
    assert_eq!(ResourceClass::classify("/users/7/stats"), ResourceClass::Profile);
    assert_eq!(ResourceClass::classify("/achievements"), ResourceClass::Profile);
    assert_eq!(ResourceClass::classify("/stories/42"), ResourceClass::Story);
    assert_eq!(
      ResourceClass::classify("/stories/42/chapters?page=2"),
      ResourceClass::Story
    );
    assert_eq!(
      ResourceClass::classify("/notifications/unread"),
      ResourceClass::Notifications
    );
    assert_eq!(
      ResourceClass::classify("/stories/42/progress"),
      ResourceClass::Progress
    );
    assert_eq!(ResourceClass::classify("/search?q=users"), ResourceClass::Other);
  }

  #[test]
  fn test_nested_story_paths_are_story_content() {
    assert_eq!(ResourceClass::classify("/users/7/stories"), ResourceClass::Story);
    assert_eq!(ResourceClass::classify("/stories/42/stats"), ResourceClass::Story);
    assert_eq!(ResourceClass::classify("/users/7/episodes"), ResourceClass::Story);

    let policy = TtlPolicy::default();
    assert_eq!(policy.ttl_for("/users/7/stories"), Duration::days(14));
    assert_eq!(policy.ttl_for("/users/7"), Duration::days(365));
  }

  #[test]
  fn test_default_ttls() {
    let policy = TtlPolicy::default();
    assert_eq!(policy.ttl_for("/users/profile"), Duration::days(365));
    assert_eq!(policy.ttl_for("/stories/42"), Duration::days(14));
    assert_eq!(policy.ttl_for("/notifications"), Duration::minutes(5));
    assert_eq!(policy.ttl_for("/reading-progress/42"), Duration::hours(1));
    assert_eq!(policy.ttl_for("/tags"), Duration::hours(24));
  }

  #[test]
  fn test_overrides_from_config() {
    let policy = TtlPolicy::from_config(&TtlConfig {
      story_secs: 10,
      ..TtlConfig::default()
    });
    assert_eq!(policy.ttl_for("/stories/1"), Duration::seconds(10));
    assert_eq!(policy.ttl_for("/notifications"), Duration::minutes(5));
  }
}
