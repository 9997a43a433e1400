//! Typed page operations over a control session.

use crate::channel::ControlSession;
use crate::error::{CoreError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

/// Event carrying page lifecycle milestones (`load`, `networkIdle`, ...).
pub const LIFECYCLE_EVENT: &str = "Page.lifecycleEvent";

/// Event fired for every received HTTP response.
pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";

/// Enable page domain events, including lifecycle events.
pub async fn enable_page_events(session: &dyn ControlSession) -> Result<()> {
    session.send_command("Page.enable", Value::Null).await?;
    session
        .send_command("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
        .await?;
    Ok(())
}

/// Enable network domain events.
pub async fn enable_network_events(session: &dyn ControlSession) -> Result<()> {
    session.send_command("Network.enable", Value::Null).await?;
    Ok(())
}

/// Enable every event domain a page load touches.
pub async fn enable_all_events(session: &dyn ControlSession) -> Result<()> {
    for domain in ["DOM", "Runtime", "Log"] {
        session
            .send_command(&format!("{domain}.enable"), Value::Null)
            .await?;
    }
    enable_page_events(session).await?;
    enable_network_events(session).await
}

/// Block loading of resources whose URL matches any of `patterns`.
///
/// Patterns may use `*` wildcards. An empty list is a no-op.
pub async fn set_blocked_urls(session: &dyn ControlSession, patterns: &[String]) -> Result<()> {
    if patterns.is_empty() {
        return Ok(());
    }
    tracing::debug!(count = patterns.len(), "Blocking URLs");
    enable_network_events(session).await?;
    session
        .send_command("Network.setBlockedURLs", json!({ "urls": patterns }))
        .await?;
    Ok(())
}

/// Navigate the page to `url`, returning the navigated frame id.
pub async fn navigate(session: &dyn ControlSession, url: &str) -> Result<String> {
    tracing::debug!(url = %url, "Navigating");
    let response = session
        .send_command("Page.navigate", json!({ "url": url }))
        .await?;

    if let Some(error) = response
        .get("errorText")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
    {
        return Err(CoreError::Navigation(format!("{url}: {error}")));
    }

    response
        .get("frameId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CoreError::Navigation(format!("{url}: no frame id in response")))
}

/// Evaluate a function body (`return ...`) in the page and return its
/// value. Promises are awaited.
pub async fn evaluate(session: &dyn ControlSession, body: &str) -> Result<Value> {
    let expression = format!("(function() {{ {body} }})()");
    let response = session
        .send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await?;

    if let Some(details) = response.get("exceptionDetails") {
        let description = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("script threw an exception");
        return Err(CoreError::Evaluation(description.to_string()));
    }

    Ok(response
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

/// Evaluate `body` and read the result as an integer.
pub async fn evaluate_u32(session: &dyn ControlSession, body: &str) -> Result<u32> {
    let value = evaluate(session, body).await?;
    value
        .as_f64()
        .filter(|v| *v >= 0.0)
        .map(|v| v.min(f64::from(u32::MAX)) as u32)
        .ok_or_else(|| CoreError::Evaluation(format!("expected a number, got {value}")))
}

/// Override the viewport size.
pub async fn set_device_metrics_override(
    session: &dyn ControlSession,
    width: u32,
    height: u32,
) -> Result<()> {
    session
        .send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
                "fitWindow": false,
            }),
        )
        .await?;
    Ok(())
}

/// Resize the visible area of the page.
pub async fn set_visible_size(session: &dyn ControlSession, width: u32, height: u32) -> Result<()> {
    session
        .send_command(
            "Emulation.setVisibleSize",
            json!({ "width": width, "height": height }),
        )
        .await?;
    Ok(())
}

/// Capture a PNG screenshot of the current viewport.
pub async fn capture_screenshot(session: &dyn ControlSession) -> Result<Vec<u8>> {
    let response = session
        .send_command(
            "Page.captureScreenshot",
            json!({ "format": "png", "fromSurface": true }),
        )
        .await?;
    let data = response
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::Capture("screenshot response has no data".into()))?;
    BASE64
        .decode(data)
        .map_err(|e| CoreError::Capture(format!("invalid screenshot data: {e}")))
}

/// Fetch the body of a received response.
pub async fn response_body(session: &dyn ControlSession, request_id: &str) -> Result<Vec<u8>> {
    let response = session
        .send_command("Network.getResponseBody", json!({ "requestId": request_id }))
        .await
        .map_err(|e| CoreError::Capture(format!("failed to fetch the resource: {e}")))?;

    let body = response
        .get("body")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::Capture("failed to fetch the resource (internal error)".into()))?;

    if response.get("base64Encoded").and_then(Value::as_bool) == Some(true) {
        BASE64
            .decode(body)
            .map_err(|e| CoreError::Capture(format!("read error: {e}")))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

/// Render an evaluation result as command output.
///
/// Strings are written as-is, everything else as JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
