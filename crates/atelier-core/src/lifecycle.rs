//! Status gates and naming rules of the environment state machine.

use atelier_schema::EnvStatus;
use chrono::{DateTime, Utc};

/// Tag a committed duplicate image is published under.
pub const DUPLICATE_TAG: &str = "latest";

/// Tag an older duplicate image is parked under while a new commit replaces
/// it. Timestamped so two interleaved duplicates of the same name cannot
/// clobber each other's backup.
pub fn backup_tag(now: DateTime<Utc>) -> String {
    format!("backup-{}", now.timestamp())
}

/// Statuses for which a deactivation request is already satisfied.
pub fn is_idle(status: EnvStatus) -> bool {
    matches!(
        status,
        EnvStatus::Created | EnvStatus::Stopped | EnvStatus::Exited | EnvStatus::Dead
    )
}

/// Duplication needs a source whose filesystem has diverged from its base
/// image, which is only the case once it has been activated at least once.
pub fn can_duplicate(status: EnvStatus) -> bool {
    status != EnvStatus::Created
}

/// Image repository owned by a duplicate environment. Registry repository
/// names are lowercase; environment names are not.
pub fn duplicate_repo(name: &str) -> String {
    format!("atelier-env-{}", name.to_ascii_lowercase())
}

/// Split a free-form launch command into argv entries. Quoting is not
/// interpreted; arguments with spaces are not supported.
pub fn split_command(command: Option<&str>) -> Vec<String> {
    command
        .map(|c| c.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_statuses_skip_deactivation() {
        for status in [
            EnvStatus::Created,
            EnvStatus::Stopped,
            EnvStatus::Exited,
            EnvStatus::Dead,
        ] {
            assert!(is_idle(status), "{status} should be idle");
        }
        for status in [EnvStatus::Running, EnvStatus::Paused, EnvStatus::Restarting] {
            assert!(!is_idle(status), "{status} should not be idle");
        }
    }

    #[test]
    fn only_never_activated_environments_refuse_duplication() {
        assert!(!can_duplicate(EnvStatus::Created));
        assert!(can_duplicate(EnvStatus::Running));
        assert!(can_duplicate(EnvStatus::Stopped));
        assert!(can_duplicate(EnvStatus::Dead));
    }

    #[test]
    fn duplicate_repo_is_lowercased() {
        assert_eq!(duplicate_repo("Studio-2"), "atelier-env-studio-2");
    }

    #[test]
    fn backup_tags_carry_the_park_time() {
        use chrono::TimeZone;
        let now = Utc.timestamp_opt(1_770_000_000, 0).unwrap();
        assert_eq!(backup_tag(now), "backup-1770000000");
    }

    #[test]
    fn command_splits_on_whitespace() {
        assert_eq!(
            split_command(Some("--listen 0.0.0.0  --preview-method auto")),
            vec!["--listen", "0.0.0.0", "--preview-method", "auto"]
        );
        assert!(split_command(None).is_empty());
        assert!(split_command(Some("   ")).is_empty());
    }
}
