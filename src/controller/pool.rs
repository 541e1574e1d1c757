//! RunnerPool controller implementation
//!
//! Each reconcile is a stateless function of the pool spec, a fresh
//! registration snapshot and the live owned pod set. The engine compares
//! counts and issues at most a handful of create/delete intents per pass;
//! their outcome is observed on a later pass through the pod index, never
//! awaited here.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::reflector::Store;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{RunnerPool, RunnerPoolStatus};
use crate::credentials::{CredentialResolver, SecretCredentialResolver};
use crate::registration::{GithubRunnerApi, RegistrationClient};
use crate::{Error, FIELD_MANAGER, POOL_LABEL};

/// Trait abstracting Kubernetes client operations for RunnerPool
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Patch the status subresource of a RunnerPool
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &RunnerPoolStatus,
    ) -> Result<(), Error>;
}

/// Trait abstracting pod create/delete submission
///
/// The gateway is fire-and-forget relative to a reconcile: it submits the
/// request and returns; whether the pod actually comes up or goes away is
/// observed through the pod index on a later pass.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodProvisioner: Send + Sync {
    /// Build a runner pod from the pool's template and submit it
    async fn create_runner_pod(&self, pool: &RunnerPool) -> Result<Pod, Error>;

    /// Request deletion of a runner pod
    async fn delete_runner_pod(&self, pod: &Pod) -> Result<(), Error>;
}

/// Read-only view of pods owned by a pool
///
/// Backed by the watch-maintained reflector store in production; the engine
/// never writes to it.
#[cfg_attr(test, automock)]
pub trait PodIndex: Send + Sync {
    /// Pods whose controller owner reference carries exactly this UID
    fn owned_by(&self, uid: &str) -> Vec<Pod>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &RunnerPoolStatus,
    ) -> Result<(), Error> {
        let api: Api<RunnerPool> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}

/// Real provisioner submitting pods to the Kubernetes API
pub struct PodProvisionerImpl {
    client: Client,
}

impl PodProvisionerImpl {
    /// Create a new PodProvisionerImpl
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodProvisioner for PodProvisionerImpl {
    async fn create_runner_pod(&self, pool: &RunnerPool) -> Result<Pod, Error> {
        let pod = build_runner_pod(pool)?;
        let namespace = pool
            .namespace()
            .ok_or_else(|| Error::validation("RunnerPool has no namespace"))?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let created = pods.create(&PostParams::default(), &pod).await?;

        info!(
            namespace = %namespace,
            name = %created.name_any(),
            pool = %pool.name_any(),
            "created runner pod"
        );
        Ok(created)
    }

    async fn delete_runner_pod(&self, pod: &Pod) -> Result<(), Error> {
        let namespace = pod
            .namespace()
            .ok_or_else(|| Error::validation("pod has no namespace"))?;
        let name = pod.name_any();

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        match pods.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace = %namespace, name = %name, "requested runner pod deletion");
                Ok(())
            }
            // Already gone, which is the state we wanted
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Pod index backed by a reflector store
pub struct ReflectorPodIndex {
    store: Store<Pod>,
}

impl ReflectorPodIndex {
    /// Create an index over the given store
    pub fn new(store: Store<Pod>) -> Self {
        Self { store }
    }
}

impl PodIndex for ReflectorPodIndex {
    fn owned_by(&self, uid: &str) -> Vec<Pod> {
        // UID match only - no name or label heuristics. UIDs are unique, so
        // pods owned by a same-named pool in another namespace never leak in.
        self.store
            .state()
            .iter()
            .filter(|pod| {
                pod.owner_references()
                    .iter()
                    .any(|owner| owner.uid == uid)
            })
            .map(|pod| (**pod).clone())
            .collect()
    }
}

/// Build a runner pod from the pool's template
///
/// The pod is stamped with the pool's namespace, a generated name, the pool
/// labels and a controller owner reference, so it is always traceable to
/// exactly one owner and garbage collected with it.
pub fn build_runner_pod(pool: &RunnerPool) -> Result<Pod, Error> {
    let name = pool.name_any();
    let owner_ref = pool
        .controller_owner_ref(&())
        .ok_or_else(|| Error::validation("RunnerPool has no uid, cannot own pods"))?;

    let labels = [
        ("app".to_string(), name.clone()),
        (POOL_LABEL.to_string(), name.clone()),
    ]
    .into_iter()
    .collect();

    Ok(Pod {
        metadata: ObjectMeta {
            namespace: pool.namespace(),
            generate_name: Some(format!("{name}-pod-")),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(pool.spec.pod_spec.clone()),
        ..Default::default()
    })
}

/// Sort pods oldest-first by creation timestamp, then by name
///
/// Scale-down selection must be deterministic across reconciles so repeated
/// passes pick the same victims while earlier deletions are still in flight.
pub fn sort_by_age(pods: &mut [Pod]) {
    pods.sort_by_key(|pod| {
        (
            pod.creation_timestamp().map(|t| t.0),
            pod.name_any(),
        )
    });
}

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds the
/// collaborators behind trait objects so tests can substitute mocks.
///
/// Use [`Context::builder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client, pod_store).build();
/// ```
pub struct Context {
    /// Kubernetes client for status patches
    pub kube: Arc<dyn KubeClient>,
    /// Gateway submitting pod creates and deletes
    pub provisioner: Arc<dyn PodProvisioner>,
    /// Registration service read
    pub registration: Arc<dyn RegistrationClient>,
    /// Credential lookup
    pub credentials: Arc<dyn CredentialResolver>,
    /// Watch-maintained pod index
    pub pods: Arc<dyn PodIndex>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, pod_store: Store<Pod>) -> ContextBuilder {
        ContextBuilder::new(client, pod_store)
    }

    /// Create a context for testing with custom mock collaborators
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        provisioner: Arc<dyn PodProvisioner>,
        registration: Arc<dyn RegistrationClient>,
        credentials: Arc<dyn CredentialResolver>,
        pods: Arc<dyn PodIndex>,
    ) -> Self {
        Self {
            kube,
            provisioner,
            registration,
            credentials,
            pods,
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// Defaults to the real implementations; individual collaborators can be
/// overridden, which is primarily useful for testing against a live cluster
/// with a stubbed registration service.
pub struct ContextBuilder {
    client: Client,
    pod_store: Store<Pod>,
    registration: Option<Arc<dyn RegistrationClient>>,
    credentials: Option<Arc<dyn CredentialResolver>>,
}

impl ContextBuilder {
    fn new(client: Client, pod_store: Store<Pod>) -> Self {
        Self {
            client,
            pod_store,
            registration: None,
            credentials: None,
        }
    }

    /// Override the registration client
    pub fn registration_client(mut self, registration: Arc<dyn RegistrationClient>) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Override the credential resolver
    pub fn credential_resolver(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: Arc::new(KubeClientImpl::new(self.client.clone())),
            provisioner: Arc::new(PodProvisionerImpl::new(self.client.clone())),
            registration: self
                .registration
                .unwrap_or_else(|| Arc::new(GithubRunnerApi::new())),
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(SecretCredentialResolver::new(self.client))),
            pods: Arc::new(ReflectorPodIndex::new(self.pod_store)),
        }
    }
}

/// Reconcile a RunnerPool resource
///
/// Reads current state (credential, registration snapshot, owned pods),
/// compares counts against the declared bounds and issues create/delete
/// intents:
///
/// - registered below minimum, and every owned pod already registered:
///   provision exactly one pod. The all-registered guard bounds provisioning
///   to one in-flight pod at a time, so the engine cannot run away while
///   freshly created pods are still booting and invisible to the
///   registration service.
/// - registered above maximum: delete the excess, oldest owned pods first.
/// - otherwise: no-op.
///
/// Any failure before the decision aborts the attempt without side effects;
/// the resync re-enqueues the pool later.
#[instrument(skip(pool, ctx), fields(pool = %pool.name_any()))]
pub async fn reconcile(pool: Arc<RunnerPool>, ctx: Arc<Context>) -> Result<(), Error> {
    debug!("reconciling runner pool");

    pool.spec.validate()?;

    let namespace = pool
        .namespace()
        .ok_or_else(|| Error::validation("RunnerPool has no namespace"))?;
    let uid = pool
        .uid()
        .ok_or_else(|| Error::validation("RunnerPool has no uid"))?;

    let token = ctx.credentials.resolve(&namespace, &pool.spec.token_ref).await?;
    // Always a fresh snapshot - never cached across reconciles
    let registrations = ctx
        .registration
        .list_runners(&token, &pool.spec.organization)
        .await?;

    let mut owned = ctx.pods.owned_by(&uid);
    sort_by_age(&mut owned);

    let registered = registrations.total_count as usize;
    let min = pool.spec.min_runners as usize;
    let max = pool.spec.max_runners as usize;

    debug!(registered, owned = owned.len(), min, max, "observed pool state");

    let message = if registered < min && owned.len() == registered {
        info!(registered, min, "registered runners below minimum, provisioning one pod");
        ctx.provisioner.create_runner_pod(&pool).await?;
        "provisioned 1 runner pod".to_string()
    } else if registered > max {
        let excess = registered - max;
        info!(registered, max, excess, "registered runners above maximum, scaling down");
        if owned.len() < excess {
            warn!(
                owned = owned.len(),
                excess, "fewer owned pods than excess registrations, deleting what is owned"
            );
        }
        let mut deleted = 0;
        for pod in owned.iter().take(excess) {
            ctx.provisioner.delete_runner_pod(pod).await?;
            deleted += 1;
        }
        format!("deleted {deleted} runner pods over maximum")
    } else if registered < min {
        // Guard held: some owned pods have not completed registration yet
        debug!(
            registered,
            owned = owned.len(),
            "waiting for owned pods to register before provisioning more"
        );
        "waiting for runner registration".to_string()
    } else {
        debug!("pool within bounds, nothing to do");
        "in sync".to_string()
    };

    let status =
        RunnerPoolStatus::observed(registrations.total_count, owned.len() as u32).message(message);
    if let Err(err) = ctx.kube.patch_status(&namespace, &pool.name_any(), &status).await {
        // Status is observability, not correctness - don't fail the pass
        warn!(error = %err, "failed to update pool status");
    }

    Ok(())
}
