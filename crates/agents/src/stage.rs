use db::models::artifact::ArtifactType;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// One role in the fixed generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ProductManager,
    BackendEngineer,
    FrontendEngineer,
    DevopsEngineer,
}

impl AgentKind {
    pub fn agent_name(&self) -> &'static str {
        match self {
            AgentKind::ProductManager => "ProductManagerAgent",
            AgentKind::BackendEngineer => "BackendEngineerAgent",
            AgentKind::FrontendEngineer => "FrontendEngineerAgent",
            AgentKind::DevopsEngineer => "DevOpsEngineerAgent",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ProductManagerAgent" => Some(AgentKind::ProductManager),
            "BackendEngineerAgent" => Some(AgentKind::BackendEngineer),
            "FrontendEngineerAgent" => Some(AgentKind::FrontendEngineer),
            "DevOpsEngineerAgent" => Some(AgentKind::DevopsEngineer),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.agent_name())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown agent: {}", s))
    }
}

/// Artifact a stage commits, with its fixed version. Versions double as the
/// idempotency key, so they are assigned statically per stage rather than
/// counted at runtime.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub artifact_type: ArtifactType,
    pub version: i64,
    pub title: &'static str,
}

/// One entry of the pipeline table.
#[derive(Debug)]
pub struct StageDescriptor {
    pub agent: AgentKind,
    pub objective: &'static str,
    /// Artifact type whose most recent instance seeds this stage's
    /// requirements; the first stage reads the raw project request instead.
    pub reads: Option<ArtifactType>,
    pub writes: &'static [StageOutput],
}

/// The fixed pipeline, in execution order. Both the orchestrator and the
/// runner consult this table; stage succession is derived from array position.
pub const PIPELINE: &[StageDescriptor] = &[
    StageDescriptor {
        agent: AgentKind::ProductManager,
        objective: "Derive a software requirements specification from the project request",
        reads: None,
        writes: &[StageOutput {
            artifact_type: ArtifactType::SrsDocument,
            version: 1,
            title: "Software requirements specification",
        }],
    },
    StageDescriptor {
        agent: AgentKind::BackendEngineer,
        objective: "Design the backend services that satisfy the requirements",
        reads: Some(ArtifactType::SrsDocument),
        writes: &[StageOutput {
            artifact_type: ArtifactType::SourceCode,
            version: 1,
            title: "Backend service specification",
        }],
    },
    StageDescriptor {
        agent: AgentKind::FrontendEngineer,
        objective: "Design the frontend application over the specified requirements",
        reads: Some(ArtifactType::SrsDocument),
        writes: &[StageOutput {
            artifact_type: ArtifactType::SourceCode,
            version: 2,
            title: "Frontend application specification",
        }],
    },
    StageDescriptor {
        agent: AgentKind::DevopsEngineer,
        objective: "Produce the deployment plan and verification report for the generated system",
        reads: Some(ArtifactType::SourceCode),
        writes: &[
            StageOutput {
                artifact_type: ArtifactType::DeploymentUrl,
                version: 1,
                title: "Deployment endpoint",
            },
            StageOutput {
                artifact_type: ArtifactType::TestReport,
                version: 1,
                title: "Verification report",
            },
        ],
    },
];

pub fn first_stage() -> &'static StageDescriptor {
    &PIPELINE[0]
}

pub fn stage_for(agent: AgentKind) -> &'static StageDescriptor {
    PIPELINE
        .iter()
        .find(|stage| stage.agent == agent)
        .expect("every agent kind has a pipeline stage")
}

/// Successor of an agent in the pipeline; None for the terminal stage.
pub fn next_agent(agent: AgentKind) -> Option<AgentKind> {
    let position = PIPELINE.iter().position(|stage| stage.agent == agent)?;
    PIPELINE.get(position + 1).map(|stage| stage.agent)
}
