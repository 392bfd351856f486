//! The process-wide `KNOWN_CLUSTERS` registry (spec.md §6), seeded once
//! at startup. Unknown cluster names in admission requests fail 400.

use skydriver_core::{validation::KnownClusters, ClusterLocation, ClusterOrchestrator, KnownCluster};
use std::collections::HashMap;

pub struct ClusterRegistry {
    clusters: HashMap<String, KnownCluster>,
}

impl ClusterRegistry {
    pub fn new(clusters: Vec<KnownCluster>) -> Self {
        Self {
            clusters: clusters.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// A minimal registry good enough to boot the server without an
    /// external cluster-config file; real deployments load this from
    /// config instead (spec.md §6 leaves the seeding mechanism open).
    pub fn from_env_or_default() -> Self {
        Self::new(vec![
            KnownCluster {
                name: "sub-2".to_string(),
                orchestrator: ClusterOrchestrator::Condor,
                location: ClusterLocation::Condor {
                    collector: "condor.example.org".to_string(),
                    schedd: "schedd.example.org".to_string(),
                },
                max_n_clients_during_debug_mode: Some(5),
            },
            KnownCluster {
                name: "k8s-cloud".to_string(),
                orchestrator: ClusterOrchestrator::K8s,
                location: ClusterLocation::K8s {
                    host: "https://k8s.example.org".to_string(),
                    namespace: "skymap-workers".to_string(),
                },
                max_n_clients_during_debug_mode: Some(2),
            },
        ])
    }

    pub fn get(&self, name: &str) -> Option<&KnownCluster> {
        self.clusters.get(name)
    }
}

impl KnownClusters for ClusterRegistry {
    fn contains(&self, name: &str) -> bool {
        self.clusters.contains_key(name)
    }

    fn debug_cap(&self, name: &str) -> Option<u32> {
        self.clusters
            .get(name)
            .and_then(|c| c.max_n_clients_during_debug_mode)
    }
}
