//! Admission policies for the API's endpoint classes.
//!
//! Policies are deploy-time constants: the table below is the
//! configuration, reproduced literally rather than computed, and validated
//! once at startup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// How a request is mapped to a throttling bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Pool quota per authenticated principal, regardless of network origin.
    Identity,
    /// Pool quota per caller network address.
    Origin,
}

/// Which requests consume window budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Every admitted request consumes budget at admission time.
    AllRequests,
    /// Only requests whose response status is at or above `success_below`
    /// consume budget, recorded on the response path. Used for
    /// authentication so successful sign-ins never erode the brute-force
    /// budget.
    FailuresOnly { success_below: u16 },
}

impl CountMode {
    /// Whether budget is consumed at admission time.
    pub fn counts_on_admit(&self) -> bool {
        matches!(self, CountMode::AllRequests)
    }

    /// Whether a response with this status consumes budget.
    pub fn consumes_budget(&self, status: u16) -> bool {
        match self {
            CountMode::AllRequests => true,
            CountMode::FailuresOnly { success_below } => status >= *success_below,
        }
    }
}

/// The endpoint classes the API groups its routes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Sign-in, registration, password reset
    Authentication,
    /// Profile and match reads
    Read,
    /// Profile edits, swipes
    Write,
    /// Discovery feeds, photo processing
    ResourceIntensive,
    /// Conversation messages
    Messaging,
    /// Notification polling
    Notifications,
    /// Unauthenticated surface
    Public,
    /// Operations endpoints
    Administrative,
}

impl EndpointClass {
    /// Every endpoint class, in catalog order.
    pub const ALL: [EndpointClass; 8] = [
        EndpointClass::Authentication,
        EndpointClass::Read,
        EndpointClass::Write,
        EndpointClass::ResourceIntensive,
        EndpointClass::Messaging,
        EndpointClass::Notifications,
        EndpointClass::Public,
        EndpointClass::Administrative,
    ];
}

/// A deploy-time admission policy for one endpoint class.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Policy name, stable across deploys
    pub name: &'static str,
    /// Fixed window length
    pub window: Duration,
    /// Requests admitted per key per window
    pub max_requests: u32,
    /// How requests map to throttling buckets
    pub key_strategy: KeyStrategy,
    /// Which requests consume budget
    pub count_mode: CountMode,
}

/// The fixed table of named admission policies.
pub struct PolicyCatalog {
    policies: HashMap<EndpointClass, Policy>,
}

impl PolicyCatalog {
    /// Build the built-in catalog.
    ///
    /// Quotas give 3-10x headroom over observed legitimate usage while
    /// bounding brute-force and scraping exposure.
    pub fn builtin() -> Self {
        let policies = EndpointClass::ALL
            .iter()
            .map(|&class| (class, Self::policy_for(class)))
            .collect();
        Self { policies }
    }

    fn policy_for(class: EndpointClass) -> Policy {
        match class {
            EndpointClass::Authentication => Policy {
                name: "authentication",
                window: Duration::from_secs(15 * 60),
                max_requests: 5,
                key_strategy: KeyStrategy::Origin,
                count_mode: CountMode::FailuresOnly { success_below: 400 },
            },
            EndpointClass::Read => Policy {
                name: "read",
                window: Duration::from_secs(15 * 60),
                max_requests: 300,
                key_strategy: KeyStrategy::Identity,
                count_mode: CountMode::AllRequests,
            },
            EndpointClass::Write => Policy {
                name: "write",
                window: Duration::from_secs(15 * 60),
                max_requests: 100,
                key_strategy: KeyStrategy::Identity,
                count_mode: CountMode::AllRequests,
            },
            EndpointClass::ResourceIntensive => Policy {
                name: "resource-intensive",
                window: Duration::from_secs(60 * 60),
                max_requests: 20,
                key_strategy: KeyStrategy::Identity,
                count_mode: CountMode::AllRequests,
            },
            EndpointClass::Messaging => Policy {
                name: "messaging",
                window: Duration::from_secs(60),
                max_requests: 60,
                key_strategy: KeyStrategy::Identity,
                count_mode: CountMode::AllRequests,
            },
            EndpointClass::Notifications => Policy {
                name: "notifications",
                window: Duration::from_secs(15 * 60),
                max_requests: 200,
                key_strategy: KeyStrategy::Identity,
                count_mode: CountMode::AllRequests,
            },
            EndpointClass::Public => Policy {
                name: "public",
                window: Duration::from_secs(15 * 60),
                max_requests: 50,
                key_strategy: KeyStrategy::Origin,
                count_mode: CountMode::AllRequests,
            },
            EndpointClass::Administrative => Policy {
                name: "administrative",
                window: Duration::from_secs(15 * 60),
                max_requests: 1_000,
                key_strategy: KeyStrategy::Identity,
                count_mode: CountMode::AllRequests,
            },
        }
    }

    /// Policy for an endpoint class. The catalog covers every class by
    /// construction.
    pub fn get(&self, class: EndpointClass) -> &Policy {
        &self.policies[&class]
    }

    /// Iterate all (class, policy) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&EndpointClass, &Policy)> {
        self.policies.iter()
    }

    /// Validate the catalog once at startup.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();

        for policy in self.policies.values() {
            if policy.window.is_zero() {
                return Err(TurnstileError::Config(format!(
                    "policy {} has a zero-length window",
                    policy.name
                )));
            }
            if policy.max_requests == 0 {
                return Err(TurnstileError::Config(format!(
                    "policy {} admits no requests",
                    policy.name
                )));
            }
            if let CountMode::FailuresOnly { success_below } = policy.count_mode {
                if !(100..=599).contains(&success_below) {
                    return Err(TurnstileError::Config(format!(
                        "policy {} has an invalid success boundary {}",
                        policy.name, success_below
                    )));
                }
            }
            if !names.insert(policy.name) {
                return Err(TurnstileError::Config(format!(
                    "duplicate policy name {}",
                    policy.name
                )));
            }
        }

        Ok(())
    }
}
