use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ConvoFlowError, Result};
use crate::flow::types::FlowGraph;
use crate::flow::validation::{GraphValidator, ValidationReport};

/// 引擎读取已发布图的入口
#[async_trait]
pub trait GraphSource: Send + Sync {
    async fn load_graph(&self, flow_id: &str, version: u32) -> Result<Arc<FlowGraph>>;
    async fn latest_version(&self, flow_id: &str) -> Result<u32>;
}

/// 已发布流图注册表：发布时校验，按 (flowId, version) 保存不可变快照
#[derive(Default)]
pub struct GraphRegistry {
    flows: RwLock<HashMap<String, BTreeMap<u32, Arc<FlowGraph>>>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 校验并发布；版本号必须严格递增
    pub fn publish(&self, graph: FlowGraph) -> Result<ValidationReport> {
        let report = GraphValidator::validate(&graph);
        if !report.is_valid() {
            warn!(
                flow = %graph.id,
                version = graph.version,
                errors = report.errors().len(),
                "rejected invalid graph"
            );
            return Err(ConvoFlowError::Validation(report));
        }

        let mut flows = self.flows.write();
        let versions = flows.entry(graph.id.clone()).or_default();
        if let Some((&latest, _)) = versions.last_key_value() {
            if graph.version <= latest {
                return Err(ConvoFlowError::StaleVersion {
                    flow: graph.id.clone(),
                    version: graph.version,
                    latest,
                });
            }
        }
        info!(flow = %graph.id, version = graph.version, "published graph");
        versions.insert(graph.version, Arc::new(graph));
        Ok(report)
    }

    pub fn get(&self, flow_id: &str, version: u32) -> Option<Arc<FlowGraph>> {
        self.flows
            .read()
            .get(flow_id)
            .and_then(|versions| versions.get(&version))
            .cloned()
    }

    pub fn latest(&self, flow_id: &str) -> Option<Arc<FlowGraph>> {
        self.flows
            .read()
            .get(flow_id)
            .and_then(|versions| versions.values().next_back())
            .cloned()
    }

    pub fn list(&self) -> Vec<(String, u32)> {
        let flows = self.flows.read();
        let mut entries: Vec<_> = flows
            .iter()
            .flat_map(|(id, versions)| versions.keys().map(move |v| (id.clone(), *v)))
            .collect();
        entries.sort();
        entries
    }
}

#[async_trait]
impl GraphSource for GraphRegistry {
    async fn load_graph(&self, flow_id: &str, version: u32) -> Result<Arc<FlowGraph>> {
        self.get(flow_id, version)
            .ok_or_else(|| ConvoFlowError::FlowNotRegistered {
                flow: flow_id.to_string(),
                version,
            })
    }

    async fn latest_version(&self, flow_id: &str) -> Result<u32> {
        self.latest(flow_id)
            .map(|graph| graph.version)
            .ok_or_else(|| ConvoFlowError::FlowNotRegistered {
                flow: flow_id.to_string(),
                version: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::builder::FlowBuilder;

    fn graph(version: u32) -> FlowGraph {
        let mut builder = FlowBuilder::new("greeting");
        builder
            .version(version)
            .add_start("start")
            .add_end("done")
            .connect("start", "done");
        builder.build()
    }

    #[tokio::test]
    async fn publish_keeps_old_versions_immutable() {
        let registry = GraphRegistry::new();
        registry.publish(graph(1)).expect("v1 publishes");
        let pinned = registry.load_graph("greeting", 1).await.unwrap();
        registry.publish(graph(2)).expect("v2 publishes");

        assert_eq!(registry.latest_version("greeting").await.unwrap(), 2);
        let again = registry.load_graph("greeting", 1).await.unwrap();
        assert!(Arc::ptr_eq(&pinned, &again));
        assert_eq!(registry.list(), vec![("greeting".into(), 1), ("greeting".into(), 2)]);
    }

    #[test]
    fn publish_rejects_stale_versions_and_invalid_graphs() {
        let registry = GraphRegistry::new();
        registry.publish(graph(2)).unwrap();
        assert!(matches!(
            registry.publish(graph(2)),
            Err(ConvoFlowError::StaleVersion { latest: 2, .. })
        ));

        let mut broken = FlowBuilder::new("broken");
        broken.add_start("start");
        match registry.publish(broken.build()) {
            Err(ConvoFlowError::Validation(report)) => assert!(!report.errors().is_empty()),
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(registry.latest("broken").is_none());
    }
}
