//! FlotillaServer - MCP server that exposes microVM lifecycle operations as tools.

use crate::config::{ConfigError, FlotillaConfig};
use crate::preflight::{self, PreflightTargets};
use crate::types::*;

use flotilla_core::{CreateRequest, Orchestrator};
use flotilla_runtime::{FirecrackerRuntime, ResourceLimits, RuntimeClient};
use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData,
};
use schemars::schema_for;
use std::sync::Arc;

type Arguments = Option<serde_json::Map<String, serde_json::Value>>;

/// MCP server for Flotilla microVMs.
#[derive(Clone)]
pub struct FlotillaServer {
    orchestrator: Orchestrator,
    config: FlotillaConfig,
}

impl FlotillaServer {
    /// Create a server backed by the Firecracker runtime.
    pub fn new(config: FlotillaConfig) -> Result<Self, ConfigError> {
        let runtime = FirecrackerRuntime::new(config.firecracker_config()?)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Self::with_runtime(config, Arc::new(runtime))
    }

    /// Create a server over any runtime.
    pub fn with_runtime(
        config: FlotillaConfig,
        runtime: Arc<dyn RuntimeClient>,
    ) -> Result<Self, ConfigError> {
        let orchestrator = Orchestrator::new(runtime, config.orchestrator_config()?)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self {
            orchestrator,
            config,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &FlotillaConfig {
        &self.config
    }

    fn parse_args<T: serde::de::DeserializeOwned>(args: Arguments) -> Option<T> {
        args.and_then(|a| serde_json::from_value(serde_json::Value::Object(a)).ok())
    }

    /// Helper to create success result with JSON content
    fn json_result<T: serde::Serialize>(data: &T) -> CallToolResult {
        match serde_json::to_string_pretty(data) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!(
                "JSON serialization error: {e}"
            ))]),
        }
    }

    /// Helper to create error result
    fn error_result(message: impl Into<String>) -> CallToolResult {
        CallToolResult::error(vec![Content::text(message.into())])
    }

    /// Convert schemars RootSchema to rmcp JsonObject
    fn schema_to_json_object<T: schemars::JsonSchema>(
    ) -> Arc<serde_json::Map<String, serde_json::Value>> {
        let schema = schema_for!(T);
        let json = serde_json::to_value(&schema.schema).unwrap_or_else(|_| serde_json::json!({}));
        match json {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        }
    }

    /// Create an empty schema for tools with no parameters
    fn empty_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        map.insert("type".into(), serde_json::json!("object"));
        map.insert("properties".into(), serde_json::json!({}));
        Arc::new(map)
    }

    // ========================================================================
    // Tool Implementations
    // ========================================================================

    async fn handle_create_vm(&self, args: Arguments) -> CallToolResult {
        let Some(params) = Self::parse_args::<CreateVmParams>(args) else {
            return Self::error_result("Missing required parameters: id, image");
        };

        let mut request = CreateRequest::new(&params.id, &params.image);
        if params.memory_mib.is_some() || params.vcpu_count.is_some() {
            let defaults = self.orchestrator.config().default_limits;
            request = request.with_limits(ResourceLimits::new(
                params.memory_mib.unwrap_or(defaults.memory_mib),
                params.vcpu_count.unwrap_or(defaults.vcpu_count),
            ));
        }

        tracing::info!(instance_id = %params.id, image = %params.image, "create_vm");
        if let Err(e) = self.orchestrator.create(request).await {
            return Self::error_result(format!("Failed to create microVM: {e}"));
        }

        match self.orchestrator.get(&params.id).await {
            Ok(vm) => Self::json_result(&CreateVmResult {
                id: vm.id,
                status: vm.status.to_string(),
            }),
            // Destroyed by someone else right after creation.
            Err(e) => Self::error_result(format!("microVM vanished after creation: {e}")),
        }
    }

    async fn handle_destroy_vm(&self, args: Arguments) -> CallToolResult {
        let Some(params) = Self::parse_args::<VmIdParams>(args) else {
            return Self::error_result("Missing required parameter: id");
        };

        tracing::info!(instance_id = %params.id, "destroy_vm");
        match self.orchestrator.destroy(&params.id).await {
            Ok(report) => Self::json_result(&DestroyVmResult::from(report)),
            Err(e) => Self::error_result(format!("Failed to destroy microVM: {e}")),
        }
    }

    async fn handle_list_vms(&self) -> CallToolResult {
        let vms = self
            .orchestrator
            .list()
            .await
            .into_iter()
            .map(VmInfo::from)
            .collect();
        Self::json_result(&ListVmsResult { vms })
    }

    async fn handle_get_vm(&self, args: Arguments) -> CallToolResult {
        let Some(params) = Self::parse_args::<VmIdParams>(args) else {
            return Self::error_result("Missing required parameter: id");
        };

        match self.orchestrator.get(&params.id).await {
            Ok(vm) => Self::json_result(&VmInfo::from(vm)),
            Err(e) => Self::error_result(e.to_string()),
        }
    }

    async fn handle_preflight(&self) -> CallToolResult {
        let targets = PreflightTargets::from(&self.config);
        match tokio::task::spawn_blocking(move || preflight::run(&targets)).await {
            Ok(report) => Self::json_result(&report),
            Err(e) => Self::error_result(format!("Preflight failed to run: {e}")),
        }
    }

    /// Build the list of available tools
    fn build_tools_list() -> Vec<Tool> {
        vec![
            Tool::new(
                "create_vm",
                "Create and start a microVM from an image. Fails atomically: nothing is left behind on error.",
                Self::schema_to_json_object::<CreateVmParams>(),
            ),
            Tool::new(
                "destroy_vm",
                "Stop a microVM and release its resources. Returns any cleanup warnings.",
                Self::schema_to_json_object::<VmIdParams>(),
            ),
            Tool::new(
                "list_vms",
                "List all managed microVMs with their status.",
                Self::empty_schema(),
            ),
            Tool::new(
                "get_vm",
                "Get the status of one microVM.",
                Self::schema_to_json_object::<VmIdParams>(),
            ),
            Tool::new(
                "preflight",
                "Check whether this host can run Firecracker microVMs.",
                Self::empty_schema(),
            ),
        ]
    }
}

// ============================================================================
// ServerHandler Implementation
// ============================================================================

impl ServerHandler for FlotillaServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Flotilla MCP Server - Create and manage Firecracker microVMs. \
                 Use create_vm with an id and image, list_vms or get_vm to check status, \
                 and destroy_vm when done. Run preflight to diagnose host problems."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: Self::build_tools_list(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match request.name.as_ref() {
            "create_vm" => self.handle_create_vm(request.arguments).await,
            "destroy_vm" => self.handle_destroy_vm(request.arguments).await,
            "list_vms" => self.handle_list_vms().await,
            "get_vm" => self.handle_get_vm(request.arguments).await,
            "preflight" => self.handle_preflight().await,
            _ => Self::error_result(format!("Unknown tool: {}", request.name)),
        };

        Ok(result)
    }
}
