//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.
//!
//! Two sockets with different trust levels:
//! - the admin socket (0600 in a 0700 directory) takes CLI commands, and only
//!   from the uid that owns the daemon;
//! - the inbound socket (0666) is open to every local uid. The overview
//!   service of whichever user is bound calls back through it, and the
//!   manager's caller guard admits or silently refuses each call by the
//!   peer's uid.

use std::future::Future;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use ovproxy_core::types::{BackAction, NavBarRegion, Rect, UserId};
use ovproxy_daemon::inbound::SysUiCall;
use ovproxy_daemon::manager::ManagerEvent;

use crate::event_loop::{AdminCommand, QueueHandle, RuntimeEvent};

const ACCESS_DENIED: i64 = -32001;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Who may connect to a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketAccess {
    /// Socket 0600, directory forced to 0700.
    Owner,
    /// Socket 0666. A directory we create is made 0755; an existing one is left alone.
    AnyLocalUser,
}

/// The admin and inbound listeners, bound and ready to serve.
pub struct Endpoints {
    admin: UnixListener,
    inbound: UnixListener,
    /// Uid allowed on the admin socket.
    owner: u32,
}

impl Endpoints {
    pub async fn bind(admin_socket: &str, inbound_socket: &str) -> anyhow::Result<Self> {
        let admin_dir = Path::new(admin_socket).parent();
        if admin_dir.is_some() && admin_dir == Path::new(inbound_socket).parent() {
            anyhow::bail!(
                "inbound socket {inbound_socket} must not live in the private admin socket directory"
            );
        }

        let admin = bind_socket(admin_socket, SocketAccess::Owner).await?;
        let inbound = bind_socket(inbound_socket, SocketAccess::AnyLocalUser).await?;
        let owner = std::fs::metadata(admin_socket)?.uid();
        tracing::info!(
            admin = admin_socket,
            inbound = inbound_socket,
            owner,
            "UDS server listening"
        );
        Ok(Self {
            admin,
            inbound,
            owner,
        })
    }
}

/// Run the UDS JSON-RPC server on both endpoints.
pub async fn run_server(endpoints: Endpoints, queue: QueueHandle) -> anyhow::Result<()> {
    let Endpoints {
        admin,
        inbound,
        owner,
    } = endpoints;

    loop {
        tokio::select! {
            accepted = admin.accept() => {
                let (stream, _) = accepted?;
                let queue = queue.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_admin_connection(stream, owner, queue).await {
                        tracing::debug!("admin connection error: {e}");
                    }
                });
            }
            accepted = inbound.accept() => {
                let (stream, _) = accepted?;
                let queue = queue.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_inbound_connection(stream, queue).await {
                        tracing::debug!("inbound connection error: {e}");
                    }
                });
            }
        }
    }
}

pub(crate) async fn bind_socket(
    socket_path: &str,
    access: SocketAccess,
) -> anyhow::Result<UnixListener> {
    use std::os::unix::fs::PermissionsExt;

    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    match access {
        SocketAccess::Owner => {
            std::fs::create_dir_all(socket_dir)?;
            std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
        }
        SocketAccess::AnyLocalUser => {
            if !socket_dir.exists() {
                std::fs::create_dir_all(socket_dir)?;
                std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o755))?;
            }
        }
    }

    // Check for stale socket
    if Path::new(socket_path).exists() {
        if UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    let mode = match access {
        SocketAccess::Owner => 0o600,
        SocketAccess::AnyLocalUser => 0o666,
    };
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(mode))?;

    Ok(listener)
}

async fn handle_admin_connection(
    stream: UnixStream,
    owner: u32,
    queue: QueueHandle,
) -> anyhow::Result<()> {
    let peer = stream.peer_cred()?.uid();
    serve_admin(stream, peer, owner, queue).await
}

async fn serve_admin(
    stream: UnixStream,
    peer: u32,
    owner: u32,
    queue: QueueHandle,
) -> anyhow::Result<()> {
    serve(stream, |method, params| async move {
        if peer != owner {
            return Err(RpcFailure::new(
                ACCESS_DENIED,
                format!("uid {peer} may not administer this daemon"),
            ));
        }
        dispatch_admin(&queue, &method, params).await
    })
    .await
}

async fn handle_inbound_connection(stream: UnixStream, queue: QueueHandle) -> anyhow::Result<()> {
    let caller = UserId::from_uid(stream.peer_cred()?.uid());
    serve_inbound(stream, caller, queue).await
}

async fn serve_inbound(stream: UnixStream, caller: UserId, queue: QueueHandle) -> anyhow::Result<()> {
    serve(stream, |method, params| async move {
        dispatch_inbound(&queue, caller, &method, params).await
    })
    .await
}

/// Read one request, answer it with `handler`, write one response.
async fn serve<F, Fut>(stream: UnixStream, handler: F) -> anyhow::Result<()>
where
    F: FnOnce(String, serde_json::Value) -> Fut,
    Fut: Future<Output = Result<serde_json::Value, RpcFailure>>,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: serde_json::Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("").to_string();
    let id = request["id"].clone();
    let params = match &request["params"] {
        serde_json::Value::Null => serde_json::json!({}),
        other => other.clone(),
    };

    let response = match handler(method.clone(), params).await {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(RpcFailure { code, message }) => {
            tracing::debug!(method = method.as_str(), code, "rejecting request: {message}");
            serde_json::json!({
                "jsonrpc": "2.0",
                "error": {"code": code, "message": message},
                "id": id,
            })
        }
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

#[derive(Debug)]
struct RpcFailure {
    code: i64,
    message: String,
}

impl RpcFailure {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for RpcFailure {
    fn from(e: anyhow::Error) -> Self {
        Self::new(INTERNAL_ERROR, e.to_string())
    }
}

fn parse<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, RpcFailure> {
    serde_json::from_value(params).map_err(|e| RpcFailure::new(INVALID_PARAMS, e.to_string()))
}

#[derive(Deserialize)]
struct SwitchUserParams {
    user: UserId,
}

#[derive(Deserialize)]
struct UserSetupParams {
    setup: bool,
}

#[derive(Deserialize)]
struct NavBarRegionParams {
    rects: Vec<Rect>,
}

#[derive(Deserialize)]
struct VisibilityParams {
    visibility: f32,
}

async fn dispatch_admin(
    queue: &QueueHandle,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, RpcFailure> {
    let admin = match method {
        "status" => AdminCommand::Status,
        "switchUser" => {
            let SwitchUserParams { user } = parse(params)?;
            post(queue, ManagerEvent::UserSwitched { user })?;
            AdminCommand::Status
        }
        "setUserSetup" => {
            let UserSetupParams { setup } = parse(params)?;
            post(queue, ManagerEvent::UserSetupChanged { setup })?;
            AdminCommand::Status
        }
        "launcherChanged" => {
            post(queue, ManagerEvent::LauncherStateChanged)?;
            AdminCommand::Status
        }
        "reconnect" => {
            post(queue, ManagerEvent::Connect)?;
            AdminCommand::Status
        }
        "notifyBackAction" => AdminCommand::NotifyBackAction(parse::<BackAction>(params)?),
        "setNavBarRegion" => {
            let NavBarRegionParams { rects } = parse(params)?;
            AdminCommand::SetNavBarRegion(NavBarRegion { rects })
        }
        "notifyAssistantVisibility" => {
            let VisibilityParams { visibility } = parse(params)?;
            AdminCommand::NotifyAssistantVisibility(visibility)
        }
        "notifyQuickStepStarted" => AdminCommand::NotifyQuickStepStarted,
        "notifyQuickScrubStarted" => AdminCommand::NotifyQuickScrubStarted,
        _ => return Err(RpcFailure::new(METHOD_NOT_FOUND, "method not found")),
    };

    Ok(queue.admin(admin).await?)
}

async fn dispatch_inbound(
    queue: &QueueHandle,
    caller: UserId,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, RpcFailure> {
    if !SysUiCall::METHODS.iter().any(|m| *m == method) {
        return Err(RpcFailure::new(METHOD_NOT_FOUND, "method not found"));
    }
    let call: SysUiCall = parse(serde_json::json!({
        "method": method,
        "params": params,
    }))?;
    let reply = queue.inbound(caller, call).await?;
    serde_json::to_value(reply).map_err(|e| RpcFailure::new(INTERNAL_ERROR, e.to_string()))
}

fn post(queue: &QueueHandle, event: RuntimeEvent) -> Result<(), RpcFailure> {
    if queue.post_event(event) {
        Ok(())
    } else {
        Err(RpcFailure::new(INTERNAL_ERROR, "manager queue closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use ovproxy_daemon::manager::{ManagerConfig, ProxyConnectionManager};
    use ovproxy_daemon::prefs::MemoryPrefs;

    use crate::client::rpc_call;
    use crate::event_loop::{TokioScheduler, run_queue};
    use crate::launcher::LauncherBinder;

    struct Harness {
        _dir: tempfile::TempDir,
        admin: String,
        inbound: String,
        launcher_dir: std::path::PathBuf,
        queue: QueueHandle,
        user: UserId,
    }

    /// Start queue + server in a temp dir. The bound user is the test process's own.
    async fn start(radius: f32) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let user = UserId::from_uid(dir.path().metadata().expect("metadata").uid());
        let admin = dir.path().join("run").join("ovproxyd.sock");
        let admin = admin.display().to_string();
        let inbound = dir.path().join("sysui").join("sysui.sock");
        let inbound = inbound.display().to_string();
        let launcher_dir = dir.path().join("launcher");
        std::fs::create_dir_all(&launcher_dir).expect("mkdir");

        let (queue, rx) = QueueHandle::channel();
        let mut config = ManagerConfig::default();
        config.initial_user = user;
        config.init.window_corner_radius = radius;
        config.init.sysui_endpoint = inbound.clone();
        config.backoff.base_ms = 20;
        config.backoff.max_ms = 200;
        let manager = ProxyConnectionManager::new(
            config,
            LauncherBinder::new(&launcher_dir, queue.clone()),
            TokioScheduler::new(queue.clone()),
            MemoryPrefs::new(),
        );
        tokio::spawn(run_queue(manager, rx));

        let endpoints = Endpoints::bind(&admin, &inbound).await.expect("bind");
        tokio::spawn(run_server(endpoints, queue.clone()));

        Harness {
            _dir: dir,
            admin,
            inbound,
            launcher_dir,
            queue,
            user,
        }
    }

    fn launcher_socket(h: &Harness, user: UserId) -> UnixListener {
        UnixListener::bind(h.launcher_dir.join(format!("overview-{user}.sock")))
            .expect("launcher listen")
    }

    async fn wait_connected(socket: &str) -> serde_json::Value {
        for _ in 0..100 {
            let status = rpc_call(socket, "status", serde_json::json!({}))
                .await
                .expect("status");
            if status["connected"] == true {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("daemon never connected");
    }

    /// Send one request over an already connected stream and return the raw response.
    async fn request(
        mut client: UnixStream,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let mut req = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 7,
        }))
        .expect("encode");
        req.push('\n');
        client.write_all(req.as_bytes()).await.expect("write");
        let mut line = String::new();
        BufReader::new(client)
            .read_line(&mut line)
            .await
            .expect("read");
        serde_json::from_str(line.trim()).expect("json")
    }

    /// Inbound call as if it came from a process of `caller`.
    async fn inbound_as(
        h: &Harness,
        caller: UserId,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let (client, server) = UnixStream::pair().expect("pair");
        let serving = tokio::spawn(serve_inbound(server, caller, h.queue.clone()));
        let response = request(client, method, params).await;
        serving.await.expect("join").expect("serve");
        response
    }

    #[tokio::test]
    async fn status_reports_disconnected_without_launcher() {
        let h = start(0.0).await;
        let status = rpc_call(&h.admin, "status", serde_json::Value::Null)
            .await
            .expect("status");
        assert_eq!(status["phase"], "disconnected");
        assert_eq!(status["connected"], false);
        assert_eq!(status["current_user"], h.user.get());
    }

    #[tokio::test]
    async fn admin_socket_is_private_and_inbound_socket_is_open() {
        let h = start(0.0).await;
        let mode = |path: &str| {
            std::fs::metadata(path)
                .expect("metadata")
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode(&h.admin), 0o600);
        let admin_dir = std::path::Path::new(&h.admin).parent().expect("parent");
        assert_eq!(mode(&admin_dir.display().to_string()), 0o700);

        assert_eq!(mode(&h.inbound), 0o666);
        let inbound_dir = std::path::Path::new(&h.inbound).parent().expect("parent");
        assert_eq!(mode(&inbound_dir.display().to_string()), 0o755);
    }

    #[tokio::test]
    async fn inbound_socket_may_not_share_admin_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let admin = dir.path().join("ovproxyd.sock").display().to_string();
        let inbound = dir.path().join("sysui.sock").display().to_string();
        let err = Endpoints::bind(&admin, &inbound)
            .await
            .err()
            .expect("shared directory rejected");
        assert!(err.to_string().contains("private admin socket directory"));
    }

    #[tokio::test]
    async fn second_server_refuses_live_socket() {
        let h = start(0.0).await;
        let err = bind_socket(&h.admin, SocketAccess::Owner)
            .await
            .expect_err("already running");
        assert!(err.to_string().contains("already running"));
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let h = start(0.0).await;
        let err = rpc_call(&h.admin, "bogus", serde_json::json!({}))
            .await
            .expect_err("bogus method");
        assert!(err.to_string().contains("-32601"), "got {err}");
    }

    #[tokio::test]
    async fn each_socket_serves_only_its_own_methods() {
        let h = start(0.0).await;
        let err = rpc_call(&h.admin, "getWindowCornerRadius", serde_json::json!({}))
            .await
            .expect_err("inbound method on admin socket");
        assert!(err.to_string().contains("-32601"), "got {err}");

        let err = rpc_call(&h.inbound, "switchUser", serde_json::json!({"user": 3}))
            .await
            .expect_err("admin method on inbound socket");
        assert!(err.to_string().contains("-32601"), "got {err}");
    }

    #[tokio::test]
    async fn bad_params_are_invalid() {
        let h = start(0.0).await;
        let err = rpc_call(&h.admin, "switchUser", serde_json::json!({"user": "x"}))
            .await
            .expect_err("bad params");
        assert!(err.to_string().contains("-32602"), "got {err}");

        let err = rpc_call(&h.inbound, "startScreenPinning", serde_json::json!({}))
            .await
            .expect_err("missing task id");
        assert!(err.to_string().contains("-32602"), "got {err}");
    }

    #[tokio::test]
    async fn admin_commands_from_another_uid_are_refused() {
        let h = start(0.0).await;
        let owner = std::fs::metadata(&h.admin).expect("metadata").uid();

        let (client, server) = UnixStream::pair().expect("pair");
        let serving = tokio::spawn(serve_admin(server, owner + 1, owner, h.queue.clone()));
        let response = request(client, "switchUser", serde_json::json!({"user": 7})).await;
        serving.await.expect("join").expect("serve");
        assert_eq!(response["error"]["code"], ACCESS_DENIED);
        assert_eq!(response["id"], 7);

        let status = rpc_call(&h.admin, "status", serde_json::json!({}))
            .await
            .expect("status");
        assert_eq!(status["current_user"], h.user.get());
    }

    #[tokio::test]
    async fn inbound_call_before_connect_gets_default_reply() {
        let h = start(16.0).await;
        let reply = rpc_call(&h.inbound, "getWindowCornerRadius", serde_json::Value::Null)
            .await
            .expect("call");
        assert_eq!(reply, serde_json::json!(0.0));
    }

    #[tokio::test]
    async fn connects_to_launcher_and_serves_inbound_calls() {
        let h = start(16.0).await;
        let launcher = launcher_socket(&h, h.user);

        rpc_call(&h.admin, "launcherChanged", serde_json::json!({}))
            .await
            .expect("launcherChanged");
        let (service, _) = launcher.accept().await.expect("accept");
        let status = wait_connected(&h.admin).await;
        assert_eq!(status["bound_user"], h.user.get());
        assert_eq!(status["backoff_attempts"], 0);

        let mut lines = BufReader::new(service).lines();
        let init = lines.next_line().await.expect("read").expect("line");
        let init: serde_json::Value = serde_json::from_str(&init).expect("json");
        assert_eq!(init["method"], "onInitialize");
        assert_eq!(init["params"]["sysui_endpoint"], h.inbound.as_str());

        let radius = rpc_call(&h.inbound, "getWindowCornerRadius", serde_json::json!({}))
            .await
            .expect("radius");
        assert_eq!(radius, serde_json::json!(16.0));

        rpc_call(&h.inbound, "setInteractionState", serde_json::json!({"flags": 1}))
            .await
            .expect("flags");
        let status = rpc_call(&h.admin, "status", serde_json::json!({}))
            .await
            .expect("status");
        assert_eq!(status["interaction_flags"], 1);
        assert_eq!(status["show_swipe_up_ui"], false);

        let monitor = rpc_call(
            &h.inbound,
            "monitorGestureInput",
            serde_json::json!({"name": "swipe-up", "display_id": 0}),
        )
        .await
        .expect("monitor");
        assert_eq!(monitor["name"], "swipe-up");
        assert!(monitor["token"].as_u64().is_some());

        rpc_call(
            &h.admin,
            "notifyAssistantVisibility",
            serde_json::json!({"visibility": 0.5}),
        )
        .await
        .expect("visibility");
        let line = lines.next_line().await.expect("read").expect("line");
        let message: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(message["method"], "onAssistantVisibilityChanged");
        assert_eq!(message["params"]["visibility"], 0.5);
    }

    #[tokio::test]
    async fn serves_inbound_calls_for_switched_user() {
        let h = start(16.0).await;
        let other = UserId(h.user.get() + 1);
        let launcher = launcher_socket(&h, other);

        rpc_call(&h.admin, "switchUser", serde_json::json!({"user": other.get()}))
            .await
            .expect("switchUser");
        let (_service, _) = tokio::time::timeout(Duration::from_secs(2), launcher.accept())
            .await
            .expect("bind in time")
            .expect("accept");
        let status = wait_connected(&h.admin).await;
        assert_eq!(status["bound_user"], other.get());

        let reply = inbound_as(&h, other, "getWindowCornerRadius", serde_json::json!({})).await;
        assert_eq!(reply["result"], serde_json::json!(16.0));

        inbound_as(&h, other, "setInteractionState", serde_json::json!({"flags": 1})).await;
        let status = rpc_call(&h.admin, "status", serde_json::json!({}))
            .await
            .expect("status");
        assert_eq!(status["interaction_flags"], 1);

        // the daemon owner's own processes are no longer the bound user
        let reply = rpc_call(&h.inbound, "getWindowCornerRadius", serde_json::json!({}))
            .await
            .expect("call");
        assert_eq!(reply, serde_json::json!(0.0));
    }

    #[tokio::test]
    async fn launcher_death_triggers_reconnect() {
        let h = start(0.0).await;
        let launcher = launcher_socket(&h, h.user);
        rpc_call(&h.admin, "launcherChanged", serde_json::json!({}))
            .await
            .expect("launcherChanged");
        let (service, _) = launcher.accept().await.expect("accept");
        wait_connected(&h.admin).await;

        // service dies; the daemon rebinds straight away
        drop(service);
        let (_service, _) = tokio::time::timeout(Duration::from_secs(2), launcher.accept())
            .await
            .expect("rebind in time")
            .expect("accept");
        let status = wait_connected(&h.admin).await;
        assert_eq!(status["gesture_monitors"], 0);
    }
}
