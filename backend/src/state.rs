use crate::config::GatewayConfig;
use crate::db::Db;
use crate::errors::ApiError;
use crate::relayer::RelayerClient;
use crate::subgraph::{SubgraphClient, INDEXER_TIMEOUT};
use credential_proofs::groth16::{deserialize_pk, serialize_pk, CircuitKeys};
use credential_proofs::{CircuitId, Groth16Backend, Policy, TestConfig};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<GatewayConfig>,
    pub zk: Arc<Groth16Backend>,
    pub groups: Option<Arc<SubgraphClient>>,
    pub relayer: Option<Arc<RelayerClient>>,
    key_cells: Arc<Mutex<HashMap<CircuitId, Arc<OnceCell<CircuitKeys>>>>>,
}

impl AppState {
    pub fn new(db: Db, config: GatewayConfig) -> Result<Self, ApiError> {
        let groups = match &config.subgraph_url {
            Some(url) => Some(Arc::new(
                SubgraphClient::new(url.clone(), INDEXER_TIMEOUT).map_err(|_| ApiError::Internal)?,
            )),
            None => None,
        };
        let relayer = match &config.relayer_webhook_url {
            Some(url) => Some(Arc::new(
                RelayerClient::new(url.clone(), config.relayer_timeout).map_err(|_| ApiError::Internal)?,
            )),
            None => None,
        };

        Ok(Self {
            db,
            config: Arc::new(config),
            zk: Arc::new(Groth16Backend::new()),
            groups,
            relayer,
            key_cells: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Ensure Groth16 keys for `circuit` exist on disk and are loaded into the backend.
    ///
    /// This runs the trusted setup (prototype) the first time a circuit shape is needed.
    pub async fn ensure_keys(&self, circuit: CircuitId) -> Result<CircuitKeys, ApiError> {
        let cell = self
            .key_cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(circuit)
            .or_default()
            .clone();

        let zk = self.zk.clone();
        let keys_dir = self.config.keys_dir();

        cell.get_or_try_init(|| async move {
            tokio::task::spawn_blocking(move || load_or_setup(&zk, circuit, &keys_dir))
                .await
                .map_err(|_| ApiError::Internal)?
        })
        .await
        .cloned()
    }

    pub async fn ensure_all_keys(&self, circuits: &[CircuitId]) -> Result<(), ApiError> {
        for circuit in circuits {
            self.ensure_keys(*circuit).await?;
        }
        Ok(())
    }
}

fn load_or_setup(zk: &Groth16Backend, circuit: CircuitId, keys_dir: &Path) -> Result<CircuitKeys, ApiError> {
    std::fs::create_dir_all(keys_dir).map_err(|_| ApiError::Internal)?;
    let pk_path = keys_dir.join(format!("{circuit}.pk.bin"));

    if pk_path.exists() {
        let pk_bytes = std::fs::read(&pk_path).map_err(|_| ApiError::Internal)?;
        let pk = deserialize_pk(&pk_bytes).map_err(|_| ApiError::Internal)?;
        tracing::info!(%circuit, "loaded cached groth16 keys");
        return Ok(zk.insert_keys(circuit, pk));
    }

    // Trusted setup randomness (prototype).
    //
    // IMPORTANT: In production, use an MPC ceremony.
    let keys = zk.setup(circuit, &mut OsRng).map_err(|_| ApiError::Internal)?;
    let pk_bytes = serialize_pk(&keys.pk).map_err(|_| ApiError::Internal)?;
    std::fs::write(&pk_path, pk_bytes).map_err(|_| ApiError::Internal)?;
    tracing::info!(%circuit, path = %pk_path.display(), "generated groth16 keys");

    Ok(keys)
}

/// Every circuit shape a credential's solutions and ratings are proven with.
pub fn credential_circuits(config: &TestConfig, depth: usize) -> Vec<CircuitId> {
    let mut circuits = vec![
        CircuitId::TestSolution {
            test_height: config.test_height,
            depth,
        },
        CircuitId::Ownership { depth },
    ];
    if Policy::of(config) == Policy::GradeRestricted {
        circuits.push(CircuitId::GradeClaim { depth });
    }
    circuits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use credential_proofs::groth16::serialize_vk;

    #[tokio::test(flavor = "multi_thread")]
    async fn keys_are_cached_on_disk_and_reloaded() {
        let config = GatewayConfig::for_tests();
        let circuit = CircuitId::Ownership { depth: 2 };

        let first = AppState::new(db::connect_memory().await.unwrap(), config.clone()).unwrap();
        let generated = first.ensure_keys(circuit).await.unwrap();
        assert!(config.keys_dir().join("ownership-d2.pk.bin").exists());

        // A fresh process picks up the same keys instead of running setup again.
        let second = AppState::new(db::connect_memory().await.unwrap(), config).unwrap();
        let loaded = second.ensure_keys(circuit).await.unwrap();
        assert_eq!(
            serialize_vk(generated.vk()).unwrap(),
            serialize_vk(loaded.vk()).unwrap()
        );
        assert!(second.zk.keys(&circuit).is_some());
    }
}
