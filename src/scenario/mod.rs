//! Scenario engine: weighted workflow selection
//!
//! A static table of named workflows, each with a relative weight and a
//! payload generator. Selection uses a single uniform draw and a
//! cumulative-sum walk; weights need not sum to any fixed total.

pub mod payload;

pub use payload::{
    BrowseGenerator, IdleGenerator, MailboxSyncGenerator, MessageGenerator, SearchGenerator,
    TriageGenerator,
};

use rand::Rng;

use crate::config::Config;
use crate::error::{MailstormError, Result};
use crate::protocol::{ActionParams, ProtocolKind, TargetSelector};

/// Produces concrete operation parameters for a workflow, keyed by
/// (simulated-user-id, iteration-number). Implementations are deterministic
/// in their inputs so runs with a fixed seed are reproducible.
pub trait PayloadGenerator: Send + Sync {
    fn generate(&self, user_id: u64, iteration: u64) -> ActionParams;
}

/// A named, weighted class of end-to-end user behavior
pub struct WorkflowDefinition {
    pub name: &'static str,
    pub weight: f64,
    pub target: ProtocolKind,
    generator: Box<dyn PayloadGenerator>,
}

impl WorkflowDefinition {
    pub fn new(
        name: &'static str,
        weight: f64,
        target: ProtocolKind,
        generator: Box<dyn PayloadGenerator>,
    ) -> Self {
        Self {
            name,
            weight,
            target,
            generator,
        }
    }

    pub fn generate(&self, user_id: u64, iteration: u64) -> ActionParams {
        self.generator.generate(user_id, iteration)
    }
}

/// Holds the workflow table and performs weighted selection
pub struct ScenarioEngine {
    workflows: Vec<WorkflowDefinition>,
    total_weight: f64,
}

impl ScenarioEngine {
    pub fn new(workflows: Vec<WorkflowDefinition>) -> Result<Self> {
        if workflows.is_empty() {
            return Err(MailstormError::ConfigError {
                message: "scenario engine needs at least one workflow".to_string(),
                config_key: None,
            });
        }
        let mut names = std::collections::HashSet::new();
        for workflow in &workflows {
            if workflow.weight <= 0.0 || !workflow.weight.is_finite() {
                return Err(MailstormError::ConfigError {
                    message: format!(
                        "workflow {} has non-positive weight {}",
                        workflow.name, workflow.weight
                    ),
                    config_key: None,
                });
            }
            if !names.insert(workflow.name) {
                return Err(MailstormError::ConfigError {
                    message: format!("duplicate workflow name {}", workflow.name),
                    config_key: None,
                });
            }
        }
        let total_weight = workflows.iter().map(|w| w.weight).sum();
        Ok(Self {
            workflows,
            total_weight,
        })
    }

    /// Pick a workflow with probability `weight / total_weight`.
    /// One uniform draw, one O(n) walk; the table is small.
    pub fn select<R: Rng>(&self, rng: &mut R) -> &WorkflowDefinition {
        let draw = rng.gen::<f64>() * self.total_weight;
        let mut cumulative = 0.0;
        for workflow in &self.workflows {
            cumulative += workflow.weight;
            if draw < cumulative {
                return workflow;
            }
        }
        // floating-point edge: the draw landed on the summed boundary
        &self.workflows[0]
    }

    pub fn workflows(&self) -> &[WorkflowDefinition] {
        &self.workflows
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }
}

/// The default workflow mix, filtered to the selected targets
pub fn default_workflows(config: &Config, selector: TargetSelector) -> Vec<WorkflowDefinition> {
    let domain = config.target.mail_domain.clone();
    let partitions = config.session.partitions;

    let mut workflows = vec![
        WorkflowDefinition::new(
            "send_and_deliver",
            35.0,
            ProtocolKind::Submission,
            Box::new(MessageGenerator::new(domain, partitions)),
        ),
        WorkflowDefinition::new(
            "mailbox_sync",
            25.0,
            ProtocolKind::Retrieval,
            Box::new(MailboxSyncGenerator::default()),
        ),
        WorkflowDefinition::new(
            "inbox_browse",
            20.0,
            ProtocolKind::Api,
            Box::new(BrowseGenerator::default()),
        ),
        WorkflowDefinition::new(
            "message_search",
            10.0,
            ProtocolKind::Api,
            Box::new(SearchGenerator::default()),
        ),
        WorkflowDefinition::new(
            "message_triage",
            8.0,
            ProtocolKind::Api,
            Box::new(TriageGenerator::default()),
        ),
        WorkflowDefinition::new(
            "idle_watch",
            2.0,
            ProtocolKind::Retrieval,
            Box::new(IdleGenerator::default()),
        ),
    ];
    workflows.retain(|w| selector.includes(w.target));
    workflows
}
