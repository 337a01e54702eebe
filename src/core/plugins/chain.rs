use std::sync::Arc;

use super::{Plugin, PluginContext, PluginOutcome, PluginVerdict, Verdict, build_plugin};
use crate::{
    config::{PluginSpec, PluginStage, ValidationResult},
    core::exchange::{GatewayRequest, GatewayResponse},
    metrics,
};

#[derive(Clone)]
struct Registered {
    name: String,
    priority: i32,
    plugin: Arc<dyn Plugin>,
}

/// How a stage ended.
#[derive(Debug)]
pub enum StageOutcome<T> {
    /// Every plugin ran; this is the final value
    Completed(T),
    Aborted {
        plugin: String,
        response: GatewayResponse,
        reason: String,
    },
}

/// Ordered pre-request and post-response plugin lists.
#[derive(Clone, Default)]
pub struct PluginChain {
    pre: Vec<Registered>,
    post: Vec<Registered>,
}

impl std::fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |list: &[Registered]| list.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
        f.debug_struct("PluginChain")
            .field("pre", &names(&self.pre))
            .field("post", &names(&self.post))
            .finish()
    }
}

impl PluginChain {
    /// Build the built-in plugins declared in configuration.
    pub fn from_specs(specs: &[PluginSpec]) -> ValidationResult<Self> {
        let mut chain = Self::default();
        for spec in specs {
            chain.register(&spec.name, spec.stage, spec.priority, build_plugin(&spec.kind)?);
        }
        Ok(chain)
    }

    /// Add a plugin to a stage, keeping the stage sorted by priority.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        stage: PluginStage,
        priority: i32,
        plugin: Arc<dyn Plugin>,
    ) {
        let list = match stage {
            PluginStage::PreRequest => &mut self.pre,
            PluginStage::PostResponse => &mut self.post,
        };
        list.push(Registered {
            name: name.into(),
            priority,
            plugin,
        });
        // stable: equal priorities keep registration order
        list.sort_by_key(|r| r.priority);
    }

    pub fn len(&self) -> usize {
        self.pre.len() + self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of a stage's plugins in execution order
    pub fn names(&self, stage: PluginStage) -> Vec<&str> {
        let list = match stage {
            PluginStage::PreRequest => &self.pre,
            PluginStage::PostResponse => &self.post,
        };
        list.iter().map(|r| r.name.as_str()).collect()
    }

    /// Run the pre-request stage. Executed plugins are appended to `verdicts`.
    pub async fn run_pre(
        &self,
        mut request: GatewayRequest,
        ctx: &mut PluginContext,
        verdicts: &mut Vec<PluginVerdict>,
    ) -> StageOutcome<GatewayRequest> {
        for entry in &self.pre {
            match entry.plugin.on_request(&request, ctx).await {
                PluginOutcome::Continue => {
                    verdicts.push(verdict(PluginStage::PreRequest, entry, Verdict::Continued));
                }
                PluginOutcome::Replace(replaced) => {
                    verdicts.push(verdict(PluginStage::PreRequest, entry, Verdict::Modified));
                    request = replaced;
                }
                PluginOutcome::Abort { response, reason } => {
                    verdicts.push(verdict(PluginStage::PreRequest, entry, Verdict::Aborted));
                    return aborted(PluginStage::PreRequest, entry, response, reason);
                }
            }
        }
        StageOutcome::Completed(request)
    }

    /// Run the post-response stage. Executed plugins are appended to `verdicts`.
    pub async fn run_post(
        &self,
        mut response: GatewayResponse,
        ctx: &mut PluginContext,
        verdicts: &mut Vec<PluginVerdict>,
    ) -> StageOutcome<GatewayResponse> {
        for entry in &self.post {
            match entry.plugin.on_response(&response, ctx).await {
                PluginOutcome::Continue => {
                    verdicts.push(verdict(PluginStage::PostResponse, entry, Verdict::Continued));
                }
                PluginOutcome::Replace(replaced) => {
                    verdicts.push(verdict(PluginStage::PostResponse, entry, Verdict::Modified));
                    response = replaced;
                }
                PluginOutcome::Abort {
                    response: replacement,
                    reason,
                } => {
                    verdicts.push(verdict(PluginStage::PostResponse, entry, Verdict::Aborted));
                    return aborted(PluginStage::PostResponse, entry, replacement, reason);
                }
            }
        }
        StageOutcome::Completed(response)
    }
}

fn verdict(stage: PluginStage, entry: &Registered, verdict: Verdict) -> PluginVerdict {
    PluginVerdict {
        stage,
        plugin: entry.name.clone(),
        verdict,
    }
}

fn aborted<T>(
    stage: PluginStage,
    entry: &Registered,
    response: GatewayResponse,
    reason: String,
) -> StageOutcome<T> {
    metrics::increment_plugin_abort(&stage.to_string(), &entry.name);
    tracing::info!(
        stage = %stage,
        plugin = %entry.name,
        status = response.status.as_u16(),
        reason = %reason,
        "Plugin aborted request"
    );
    StageOutcome::Aborted {
        plugin: entry.name.clone(),
        response,
        reason,
    }
}
