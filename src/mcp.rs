use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::capture::LiveCapture;
use crate::browser::EokaPage;
use crate::continuity::FilePendingStore;
use crate::playback::{ChannelUi, DecisionRequest, Recovery, Speed};
use crate::session::Coordinator;
use crate::storage::{to_csv, ExportFormat, JsonFileStore, RecordingPatch, Storage};
use crate::{Config, Page};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ERR_NO_BROWSER: &str = "No browser open. Use record_start or play first.";
const ERR_NO_DECISION: &str = "No step is waiting for a decision.";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RecordStartRequest {
    #[schemars(description = "URL to open before recording starts")]
    pub url: String,
    #[schemars(description = "Recording name (default: 'Recording <date>')")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PlayRequest {
    #[schemars(description = "Recording id (from list_recordings)")]
    pub id: String,
    #[schemars(description = "Speed: real-time, fast or instant (default: the stored setting)")]
    pub speed: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DecideRequest {
    #[schemars(description = "What to do with the failed step: 'skip' or 'abort'")]
    pub action: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IdRequest {
    #[schemars(description = "Recording id")]
    pub id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RenameRequest {
    #[schemars(description = "Recording id")]
    pub id: String,
    #[schemars(description = "New name")]
    pub name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExportRequest {
    #[schemars(description = "Recording ids to export (default: all)")]
    pub ids: Option<Vec<String>>,
    #[schemars(description = "json (importable bundle, default) or csv")]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ImportRequest {
    #[schemars(description = "Export bundle JSON ({\"version\", \"recordings\": [...]})")]
    pub json: String,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn text_ok(s: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(s.into())]))
}

fn json_ok(value: &impl serde::Serialize) -> Result<CallToolResult, ErrorData> {
    text_ok(serde_json::to_string_pretty(value).map_err(err)?)
}

/// Browser-side state, created on first use.
struct Live {
    coordinator: Arc<Coordinator<EokaPage>>,
    capture: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct ReplayServer {
    config: Config,
    storage: Arc<JsonFileStore>,
    live: Arc<Mutex<Option<Live>>>,
    decision: Arc<Mutex<Option<DecisionRequest>>>,
    tool_router: ToolRouter<Self>,
}

impl ReplayServer {
    async fn coordinator(&self) -> Result<Arc<Coordinator<EokaPage>>, ErrorData> {
        let mut guard = self.live.lock().await;
        if let Some(ref live) = *guard {
            return Ok(live.coordinator.clone());
        }
        info!(
            "Launching browser (headless: {})",
            self.config.browser.headless
        );
        let page = EokaPage::launch(&self.config.browser).await.map_err(err)?;
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(page),
            self.storage.clone(),
            Arc::new(FilePendingStore::new(&self.config.storage.pending_dir)),
            self.config.clone(),
        ));
        *guard = Some(Live {
            coordinator: coordinator.clone(),
            capture: None,
        });
        Ok(coordinator)
    }

    async fn existing(&self) -> Result<Arc<Coordinator<EokaPage>>, ErrorData> {
        let guard = self.live.lock().await;
        guard
            .as_ref()
            .map(|live| live.coordinator.clone())
            .ok_or_else(|| ErrorData::internal_error(ERR_NO_BROWSER, None::<Value>))
    }

    /// Poll the tab's listeners into the recording until it stops.
    fn spawn_capture(&self, coordinator: Arc<Coordinator<EokaPage>>) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.capture.poll_interval_ms);
        tokio::spawn(async move {
            let capture = LiveCapture::new(coordinator.page().clone());
            while coordinator.is_recording().await {
                // Drains fail while a navigation tears the context down.
                if let Err(e) = capture.pump(&coordinator).await {
                    debug!("Capture poll failed: {}", e);
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Park each failed step until `decide` answers it.
    fn spawn_decisions(&self, mut decisions: tokio::sync::mpsc::UnboundedReceiver<DecisionRequest>) {
        let slot = self.decision.clone();
        tokio::spawn(async move {
            while let Some(request) = decisions.recv().await {
                info!("Waiting for decision: {}", request.failure);
                *slot.lock().await = Some(request);
            }
        });
    }
}

#[tool_router]
impl ReplayServer {
    pub fn new(config: Config) -> crate::Result<Self> {
        let storage = JsonFileStore::open(&config.storage.path)?;
        Ok(Self {
            config,
            storage: Arc::new(storage),
            live: Arc::new(Mutex::new(None)),
            decision: Arc::new(Mutex::new(None)),
            tool_router: Self::tool_router(),
        })
    }

    #[tool(
        description = "Open a URL and start recording interactions on it. Launches the browser on first call."
    )]
    async fn record_start(
        &self,
        req: Parameters<RecordStartRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let coordinator = self.coordinator().await?;
        let page = coordinator.page().clone();
        page.navigate(&req.0.url).await.map_err(err)?;
        page.wait_for_load().await.map_err(err)?;
        LiveCapture::new(page).install().await.map_err(err)?;

        let id = coordinator
            .start_recording(req.0.name)
            .await
            .map_err(err)?;
        let pump = self.spawn_capture(coordinator);
        if let Some(ref mut live) = *self.live.lock().await {
            live.capture = Some(pump);
        }
        text_ok(format!("Recording {} on {}", id, req.0.url))
    }

    #[tool(description = "Stop recording and save it. Returns the saved recording summary.")]
    async fn record_stop(&self) -> Result<CallToolResult, ErrorData> {
        let coordinator = self.existing().await?;
        if let Some(ref mut live) = *self.live.lock().await {
            if let Some(pump) = live.capture.take() {
                pump.abort();
            }
        }
        // Pick up anything queued since the last poll, then detach from the tab.
        let capture = LiveCapture::new(coordinator.page().clone());
        if let Err(e) = capture.pump(&coordinator).await {
            debug!("Final capture poll failed: {}", e);
        }
        if let Err(e) = capture.dispose().await {
            warn!("Capture listeners left in the page: {}", e);
        }
        let recording = coordinator.stop_recording().await.map_err(err)?;
        json_ok(&json!({
            "id": recording.id,
            "name": recording.name,
            "events": recording.events.len(),
            "duration": recording.duration,
            "url": recording.url,
        }))
    }

    #[tool(description = "List saved recordings, newest first.")]
    async fn list_recordings(&self) -> Result<CallToolResult, ErrorData> {
        let recordings = self.storage.list().await.map_err(err)?;
        if recordings.is_empty() {
            return text_ok("No recordings saved.");
        }
        let lines: Vec<String> = recordings
            .iter()
            .map(|r| {
                format!(
                    "{}  {}  ({} events, {}ms)",
                    r.id,
                    r.name,
                    r.events.len(),
                    r.duration
                )
            })
            .collect();
        text_ok(lines.join("\n"))
    }

    #[tool(
        description = "Play a saved recording in the background. Use status to follow it and decide when a step fails."
    )]
    async fn play(&self, req: Parameters<PlayRequest>) -> Result<CallToolResult, ErrorData> {
        let speed = match req.0.speed {
            Some(ref s) => Some(s.parse::<Speed>().map_err(err)?),
            None => None,
        };
        let coordinator = self.coordinator().await?;
        let (ui, handle) = ChannelUi::new();
        self.spawn_decisions(handle.decisions);
        coordinator
            .play(&req.0.id, speed, Arc::new(ui))
            .await
            .map_err(err)?;
        text_ok(format!("Playing {}", req.0.id))
    }

    #[tool(description = "Pause the active recording or playback.")]
    async fn pause(&self) -> Result<CallToolResult, ErrorData> {
        let mode = self.existing().await?.pause().await.map_err(err)?;
        text_ok(format!("Paused ({:?})", mode).to_lowercase())
    }

    #[tool(description = "Resume the paused recording or playback.")]
    async fn resume(&self) -> Result<CallToolResult, ErrorData> {
        let mode = self.existing().await?.resume().await.map_err(err)?;
        text_ok(format!("Resumed ({:?})", mode).to_lowercase())
    }

    #[tool(description = "Stop the running playback at its next step.")]
    async fn stop(&self) -> Result<CallToolResult, ErrorData> {
        self.existing()
            .await?
            .stop_playback()
            .await
            .map_err(err)?;
        // A parked decision would keep the player waiting forever.
        if let Some(request) = self.decision.lock().await.take() {
            request.respond(Recovery::Abort);
        }
        text_ok("Stopping playback.")
    }

    #[tool(description = "Current mode, playback state and progress, and any step awaiting a decision.")]
    async fn status(&self) -> Result<CallToolResult, ErrorData> {
        let status = match *self.live.lock().await {
            Some(ref live) => serde_json::to_value(live.coordinator.status().await).map_err(err)?,
            None => json!({ "mode": "idle" }),
        };
        let pending = self
            .decision
            .lock()
            .await
            .as_ref()
            .map(|request| request.failure.clone());
        json_ok(&json!({ "session": status, "awaitingDecision": pending }))
    }

    #[tool(description = "Answer a failed playback step: 'skip' moves on, 'abort' ends playback.")]
    async fn decide(&self, req: Parameters<DecideRequest>) -> Result<CallToolResult, ErrorData> {
        let recovery: Recovery = req.0.action.parse().map_err(err)?;
        let request = self
            .decision
            .lock()
            .await
            .take()
            .ok_or_else(|| ErrorData::internal_error(ERR_NO_DECISION, None::<Value>))?;
        let failure = request.failure.to_string();
        request.respond(recovery);
        text_ok(format!("{:?}: {}", recovery, failure))
    }

    #[tool(description = "Delete a saved recording.")]
    async fn delete(&self, req: Parameters<IdRequest>) -> Result<CallToolResult, ErrorData> {
        if self.storage.delete(&req.0.id).await.map_err(err)? {
            text_ok(format!("Deleted {}", req.0.id))
        } else {
            Err(err(crate::Error::RecordingNotFound(req.0.id)))
        }
    }

    #[tool(description = "Rename a saved recording.")]
    async fn rename(&self, req: Parameters<RenameRequest>) -> Result<CallToolResult, ErrorData> {
        let RenameRequest { id, name } = req.0;
        match self
            .storage
            .update(&id, RecordingPatch::rename(name))
            .await
            .map_err(err)?
        {
            Some(recording) => text_ok(format!("Renamed {} to '{}'", id, recording.name)),
            None => Err(err(crate::Error::RecordingNotFound(id))),
        }
    }

    #[tool(description = "Export recordings as a JSON bundle, or as CSV rows.")]
    async fn export(&self, req: Parameters<ExportRequest>) -> Result<CallToolResult, ErrorData> {
        let format = match req.0.format.as_deref() {
            Some(format) => format.parse::<ExportFormat>().map_err(err)?,
            None => ExportFormat::Json,
        };
        let bundle = self
            .storage
            .export(req.0.ids.as_deref())
            .await
            .map_err(err)?;
        match format {
            ExportFormat::Json => json_ok(&bundle),
            ExportFormat::Csv => text_ok(to_csv(&bundle.recordings)),
        }
    }

    #[tool(description = "Import recordings from a JSON bundle. Ids already stored are skipped.")]
    async fn import(&self, req: Parameters<ImportRequest>) -> Result<CallToolResult, ErrorData> {
        let summary = self.storage.import(&req.0.json).await.map_err(err)?;
        text_ok(format!(
            "Imported {}, skipped {}",
            summary.imported, summary.skipped
        ))
    }

    #[tool(description = "Close the browser. Stops any active recording without saving.")]
    async fn close(&self) -> Result<CallToolResult, ErrorData> {
        let Some(live) = self.live.lock().await.take() else {
            return text_ok("Browser not open.");
        };
        if let Some(pump) = live.capture {
            pump.abort();
        }
        if let Some(request) = self.decision.lock().await.take() {
            request.respond(Recovery::Abort);
        }
        let _ = live.coordinator.stop_playback().await;
        let page = live.coordinator.page().clone();
        drop(live.coordinator);
        match Arc::try_unwrap(page) {
            Ok(page) => page.close().await.map_err(err)?,
            Err(_) => debug!("Page still shared by a playback task; leaving it to drop"),
        }
        text_ok("Browser closed.")
    }
}

#[tool_handler]
impl ServerHandler for ReplayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "eoka-replay".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Interaction recorder and replayer. Use 'record_start' to open a URL and record, \
                 'record_stop' to save. 'list_recordings' shows saved recordings and 'play' replays one \
                 in the background. Poll 'status'; when a step fails it waits for 'decide' (skip or abort). \
                 'pause', 'resume' and 'stop' control the active session."
                    .into(),
            ),
        }
    }
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = ReplayServer::new(config)?;
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
