//! Filter policy - decides whether a classified event warrants work.
//!
//! | Event        | Qualifies when                                   | Verdict              |
//! |--------------|--------------------------------------------------|----------------------|
//! | Push         | `ref` matches the branch token (exact/contains)  | `Trigger { job }`    |
//! | Pull request | `action` contains the action token               | `NoActionConfigured` |
//! | Unknown      | never                                            | `Ignored`            |
//!
//! Pull requests that qualify have no downstream action yet. They get their
//! own verdict so callers log them distinctly from ignored events.

use crate::event::ClassifiedEvent;
use serde::Deserialize;
use std::fmt;

/// Default branch token for push events
pub const DEFAULT_BRANCH: &str = "master";

/// Default action token for pull-request events
pub const DEFAULT_PULL_REQUEST_ACTION: &str = "opened";

/// How a push `ref` is compared against the branch token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchMatch {
    /// `ref` contains the token anywhere (`refs/heads/master` matches `master`)
    #[default]
    Contains,

    /// `ref` equals the token
    Exact,
}

impl BranchMatch {
    fn matches(self, git_ref: &str, token: &str) -> bool {
        match self {
            BranchMatch::Contains => git_ref.contains(token),
            BranchMatch::Exact => git_ref == token,
        }
    }
}

/// Why an event was not acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    BranchMismatch { git_ref: String },
    ActionMismatch { action: String },
    MissingRepository,
    Unrecognized,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::BranchMismatch { git_ref } => {
                write!(f, "push to '{}' is not for the watched branch", git_ref)
            }
            IgnoreReason::ActionMismatch { action } => {
                write!(f, "pull request action '{}' is not watched", action)
            }
            IgnoreReason::MissingRepository => write!(f, "event has no repository name"),
            IgnoreReason::Unrecognized => write!(f, "unrecognized event"),
        }
    }
}

/// Outcome of evaluating an event against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Trigger the build job with this name
    Trigger { job: String },

    /// The event qualifies but nothing is wired up for it
    NoActionConfigured { repository: String },

    Ignored { reason: IgnoreReason },
}

impl Verdict {
    pub fn qualifies(&self) -> bool {
        !matches!(self, Verdict::Ignored { .. })
    }
}

/// Branch and pull-request action filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPolicy {
    branch: String,
    branch_match: BranchMatch,
    pull_request_action: String,
}

impl FilterPolicy {
    pub fn new(
        branch: impl Into<String>,
        branch_match: BranchMatch,
        pull_request_action: impl Into<String>,
    ) -> Self {
        Self {
            branch: branch.into(),
            branch_match,
            pull_request_action: pull_request_action.into(),
        }
    }

    /// Set how push refs are compared against the branch token
    pub fn with_branch_match(mut self, branch_match: BranchMatch) -> Self {
        self.branch_match = branch_match;
        self
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn branch_match(&self) -> BranchMatch {
        self.branch_match
    }

    pub fn pull_request_action(&self) -> &str {
        &self.pull_request_action
    }

    /// Evaluate an event. Pure; safe to call from any number of tasks.
    pub fn evaluate(&self, event: &ClassifiedEvent) -> Verdict {
        match event {
            ClassifiedEvent::Push(push) => {
                if !self.branch_match.matches(&push.git_ref, &self.branch) {
                    return Verdict::Ignored {
                        reason: IgnoreReason::BranchMismatch {
                            git_ref: push.git_ref.clone(),
                        },
                    };
                }
                if push.repository_name.is_empty() {
                    return Verdict::Ignored {
                        reason: IgnoreReason::MissingRepository,
                    };
                }
                Verdict::Trigger {
                    job: push.repository_name.clone(),
                }
            }
            ClassifiedEvent::PullRequest(pr) => {
                if pr.action.contains(&self.pull_request_action) {
                    Verdict::NoActionConfigured {
                        repository: pr.repository_name.clone(),
                    }
                } else {
                    Verdict::Ignored {
                        reason: IgnoreReason::ActionMismatch {
                            action: pr.action.clone(),
                        },
                    }
                }
            }
            ClassifiedEvent::Unknown(_) => Verdict::Ignored {
                reason: IgnoreReason::Unrecognized,
            },
        }
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_BRANCH,
            BranchMatch::default(),
            DEFAULT_PULL_REQUEST_ACTION,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PullRequestEvent, PushEvent};

    fn push(git_ref: &str, repo: &str) -> ClassifiedEvent {
        ClassifiedEvent::Push(PushEvent {
            git_ref: git_ref.to_string(),
            repository_name: repo.to_string(),
        })
    }

    fn pull_request(action: &str) -> ClassifiedEvent {
        ClassifiedEvent::PullRequest(PullRequestEvent {
            action: action.to_string(),
            repository_name: "svc".to_string(),
        })
    }

    #[test]
    fn test_contains_matches_full_ref() {
        let policy = FilterPolicy::default();

        assert_eq!(
            policy.evaluate(&push("refs/heads/master", "svc")),
            Verdict::Trigger {
                job: "svc".to_string()
            }
        );
        assert_eq!(
            policy.evaluate(&push("refs/heads/develop", "svc")),
            Verdict::Ignored {
                reason: IgnoreReason::BranchMismatch {
                    git_ref: "refs/heads/develop".to_string()
                }
            }
        );
    }

    #[test]
    fn test_exact_requires_equality() {
        let policy = FilterPolicy::default().with_branch_match(BranchMatch::Exact);

        assert!(!policy.evaluate(&push("refs/heads/master", "svc")).qualifies());
        assert!(!policy.evaluate(&push("refs/heads/develop", "svc")).qualifies());
        assert_eq!(
            policy.evaluate(&push("master", "svc")),
            Verdict::Trigger {
                job: "svc".to_string()
            }
        );
    }

    #[test]
    fn test_push_without_repository_is_ignored() {
        let policy = FilterPolicy::default();

        assert_eq!(
            policy.evaluate(&push("refs/heads/master", "")),
            Verdict::Ignored {
                reason: IgnoreReason::MissingRepository
            }
        );
    }

    #[test]
    fn test_pull_request_opened_has_no_action() {
        let policy = FilterPolicy::default();

        let verdict = policy.evaluate(&pull_request("opened"));
        assert!(verdict.qualifies());
        assert_eq!(
            verdict,
            Verdict::NoActionConfigured {
                repository: "svc".to_string()
            }
        );

        // substring match, so "reopened" qualifies as well
        assert!(policy.evaluate(&pull_request("reopened")).qualifies());
    }

    #[test]
    fn test_pull_request_closed_is_ignored() {
        let policy = FilterPolicy::default();

        assert!(!policy.evaluate(&pull_request("closed")).qualifies());
    }

    #[test]
    fn test_unknown_never_qualifies() {
        let policy = FilterPolicy::default();

        assert_eq!(
            policy.evaluate(&ClassifiedEvent::Unknown(b"{}".to_vec())),
            Verdict::Ignored {
                reason: IgnoreReason::Unrecognized
            }
        );
    }

    #[test]
    fn test_custom_tokens() {
        let policy = FilterPolicy::new("main", BranchMatch::Contains, "synchronize");

        assert!(policy.evaluate(&push("refs/heads/main", "svc")).qualifies());
        assert!(!policy.evaluate(&push("refs/heads/master", "svc")).qualifies());
        assert!(policy.evaluate(&pull_request("synchronize")).qualifies());
        assert!(!policy.evaluate(&pull_request("opened")).qualifies());
    }

    #[test]
    fn test_branch_match_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: BranchMatch,
        }

        let exact: Wrapper = toml::from_str(r#"mode = "exact""#).unwrap();
        assert_eq!(exact.mode, BranchMatch::Exact);

        let contains: Wrapper = toml::from_str(r#"mode = "contains""#).unwrap();
        assert_eq!(contains.mode, BranchMatch::Contains);
    }

    #[test]
    fn test_ignore_reason_display() {
        let reason = IgnoreReason::BranchMismatch {
            git_ref: "refs/heads/dev".to_string(),
        };
        assert!(reason.to_string().contains("refs/heads/dev"));
    }
}
