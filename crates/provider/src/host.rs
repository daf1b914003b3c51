//! Starts/stops a provider plugin subprocess and exposes the nine
//! operations the rest of the system consumes.

use std::time::Duration;

use http::uri::PathAndQuery;
use tokio::process::Child;
use tokio::sync::Mutex;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tracing::{info, instrument, warn};

use infractl_core::{Error, Result};

use crate::handshake::{self, HandshakeResult};
use crate::proto;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICE: &str = "tfplugin5.Provider";

/// A live handle to a started provider plugin subprocess.
pub struct PluginClient {
    full_name: String,
    grpc: Mutex<Grpc<Channel>>,
    child: Mutex<Child>,
}

impl PluginClient {
    /// `Start(ctx, path) -> PluginClient`: launches the provider binary,
    /// performs the handshake, and dials its advertised gRPC endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderLoadFailed`] if the process cannot be
    /// started, the handshake fails, or the endpoint cannot be dialed.
    #[instrument(name = "plugin_host_start", skip(binary_path), fields(full_name))]
    pub async fn start(full_name: &str, binary_path: &str) -> Result<Self> {
        let (child, handshake) = handshake::perform_handshake(binary_path, HANDSHAKE_TIMEOUT).await?;
        let channel = Self::dial(&handshake, full_name).await?;

        info!(full_name, address = %handshake.address, "provider plugin started");

        Ok(Self {
            full_name: full_name.to_string(),
            grpc: Mutex::new(Grpc::new(channel)),
            child: Mutex::new(child),
        })
    }

    async fn dial(handshake: &HandshakeResult, full_name: &str) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(handshake.endpoint_uri()).map_err(|e| {
            Error::ProviderLoadFailed { full_name: full_name.to_string(), message: e.to_string() }
        })?;
        endpoint.connect().await.map_err(|e| Error::ProviderLoadFailed {
            full_name: full_name.to_string(),
            message: format!("failed to connect to provider endpoint: {e}"),
        })
    }

    /// Whether the subprocess is still alive.
    pub async fn is_running(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// `Close()`: terminates the subprocess and releases its resources.
    #[instrument(name = "plugin_host_close", skip(self), fields(full_name = %self.full_name))]
    pub async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            warn!(full_name = %self.full_name, error = %e, "failed to kill provider subprocess");
        }
        Ok(())
    }

    async fn call<Req, Resp>(&self, method: &str, req: Req) -> Result<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        if !self.is_running().await {
            return Err(Error::PluginCrashed { full_name: self.full_name.clone() });
        }

        let path = PathAndQuery::try_from(format!("/{SERVICE}/{method}"))
            .expect("static method paths are valid");
        let codec = ProstCodec::<Req, Resp>::default();
        let mut grpc = self.grpc.lock().await;
        grpc.ready().await.map_err(|_| Error::PluginCrashed { full_name: self.full_name.clone() })?;
        let response = grpc
            .unary(tonic::Request::new(req), path, codec)
            .await
            .map_err(|status| Error::ProviderDiagnosticError {
                operation: method.to_string(),
                message: status.message().to_string(),
            })?;
        Ok(response.into_inner())
    }

    /// `GetProviderSchema`.
    #[instrument(skip(self), fields(full_name = %self.full_name))]
    pub async fn get_schema(&self) -> Result<proto::GetProviderSchemaResponse> {
        self.call("GetProviderSchema", proto::GetProviderSchemaRequest {}).await
    }

    /// `ConfigureProvider`.
    #[instrument(skip(self, config), fields(full_name = %self.full_name))]
    pub async fn configure(&self, config: proto::DynamicValue) -> Result<proto::ConfigureProviderResponse> {
        self.call("ConfigureProvider", proto::ConfigureProviderRequest { config: Some(config) }).await
    }

    /// `ValidateResourceTypeConfig`. Optional RPC: providers that do not
    /// implement it are treated as silently passing by the Adapter layer,
    /// not here.
    #[instrument(skip(self, config), fields(full_name = %self.full_name))]
    pub async fn validate_resource_config(
        &self,
        type_name: &str,
        config: proto::DynamicValue,
    ) -> Result<proto::ValidateResourceTypeConfigResponse> {
        self.call(
            "ValidateResourceTypeConfig",
            proto::ValidateResourceTypeConfigRequest { type_name: type_name.to_string(), config: Some(config) },
        )
        .await
    }

    /// `ValidateDataSourceConfig`.
    #[instrument(skip(self, config), fields(full_name = %self.full_name))]
    pub async fn validate_data_source_config(
        &self,
        type_name: &str,
        config: proto::DynamicValue,
    ) -> Result<proto::ValidateDataSourceConfigResponse> {
        self.call(
            "ValidateDataSourceConfig",
            proto::ValidateDataSourceConfigRequest { type_name: type_name.to_string(), config: Some(config) },
        )
        .await
    }

    /// `PlanManagedResourceChange`.
    #[instrument(skip(self, prior_state, proposed_new_state, config), fields(full_name = %self.full_name))]
    pub async fn plan_resource_change(
        &self,
        type_name: &str,
        prior_state: proto::DynamicValue,
        proposed_new_state: proto::DynamicValue,
        config: proto::DynamicValue,
        prior_private: Vec<u8>,
    ) -> Result<proto::PlanManagedResourceChangeResponse> {
        self.call(
            "PlanManagedResourceChange",
            proto::PlanManagedResourceChangeRequest {
                type_name: type_name.to_string(),
                prior_state: Some(prior_state),
                proposed_new_state: Some(proposed_new_state),
                config: Some(config),
                prior_private,
            },
        )
        .await
    }

    /// `ApplyManagedResourceChange`.
    #[instrument(skip(self, prior_state, planned_state, config), fields(full_name = %self.full_name))]
    pub async fn apply_resource_change(
        &self,
        type_name: &str,
        prior_state: proto::DynamicValue,
        planned_state: proto::DynamicValue,
        config: proto::DynamicValue,
        planned_private: Vec<u8>,
    ) -> Result<proto::ApplyManagedResourceChangeResponse> {
        self.call(
            "ApplyManagedResourceChange",
            proto::ApplyManagedResourceChangeRequest {
                type_name: type_name.to_string(),
                prior_state: Some(prior_state),
                planned_state: Some(planned_state),
                config: Some(config),
                planned_private,
            },
        )
        .await
    }

    /// `ReadManagedResource`.
    #[instrument(skip(self, current_state), fields(full_name = %self.full_name))]
    pub async fn read_resource(
        &self,
        type_name: &str,
        current_state: proto::DynamicValue,
        private: Vec<u8>,
    ) -> Result<proto::ReadManagedResourceResponse> {
        self.call(
            "ReadManagedResource",
            proto::ReadManagedResourceRequest { type_name: type_name.to_string(), current_state: Some(current_state), private },
        )
        .await
    }

    /// `ImportManagedResourceState`.
    #[instrument(skip(self), fields(full_name = %self.full_name))]
    pub async fn import_resource(
        &self,
        type_name: &str,
        import_id: &str,
    ) -> Result<proto::ImportManagedResourceStateResponse> {
        self.call(
            "ImportManagedResourceState",
            proto::ImportManagedResourceStateRequest { type_name: type_name.to_string(), id: import_id.to_string() },
        )
        .await
    }

    /// `ReadDataResource`.
    #[instrument(skip(self, config), fields(full_name = %self.full_name))]
    pub async fn read_data_source(
        &self,
        type_name: &str,
        config: proto::DynamicValue,
    ) -> Result<proto::ReadDataResourceResponse> {
        self.call(
            "ReadDataResource",
            proto::ReadDataResourceRequest { type_name: type_name.to_string(), config: Some(config) },
        )
        .await
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        // Child carries kill_on_drop(true) from the handshake spawn, so the
        // subprocess is reaped even if close() was never called.
    }
}
