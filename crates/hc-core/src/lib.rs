//! # hc-core
//!
//! Control channel, event waits and page commands for headless Chrome
//! running in throwaway sandboxes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     hc-core (host)                       │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │  CommandHost    │────▶│  Provisioner / Teardown  │    │
//! │  │  - execute()    │     │  (from hc-sandbox)       │    │
//! │  └─────────────────┘     └──────────────────────────┘    │
//! │           │                           │ docker           │
//! │           ▼                           ▼                  │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │   Connector     │────▶│  DevToolsTransport       │    │
//! │  │  - attach()     │     │  /json/version +         │    │
//! │  │                 │     │  chromiumoxide           │    │
//! │  └─────────────────┘     └──────────────────────────┘    │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │  PageCommand    │────▶│  EventWait               │    │
//! │  │  eval, html,    │     │  timer / listener /      │    │
//! │  │  screenshot,    │     │  interrupt, first wins   │    │
//! │  │  resource, debug│     └──────────────────────────┘    │
//! │  └─────────────────┘                                     │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │         headless Chrome container (DevTools :9222)       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use hc_core::{CommandHost, HostConfig, HtmlCommand};
//!
//! # async fn example() -> hc_core::Result<()> {
//! let host = CommandHost::new(HostConfig::from_env())?;
//! let _ctrl_c = host.listen_for_ctrl_c();
//!
//! let html = host.execute(&HtmlCommand::new("https://example.com")).await?;
//! println!("{}", String::from_utf8_lossy(&html));
//! # Ok(())
//! # }
//! ```

mod channel;
mod commands;
mod config;
mod connector;
mod devtools;
mod error;
mod host;
pub mod page;
mod wait;

#[cfg(test)]
mod testing;

pub use channel::{
    BrowserHandle, ControlSession, ControlTransport, Event, EventStream, Session, ALL_EVENTS,
};
pub use commands::{
    CommandContext, DebugCommand, EvalCommand, HtmlCommand, PageCommand, ResourceCommand,
    ScreenshotCommand, UrlMatch, VersionCommand, DEFAULT_STOP_EVENT, DEFAULT_WAIT,
};
pub use config::{HostConfig, DEFAULT_DEADLINE};
pub use connector::Connector;
pub use devtools::{
    expand_subscription, rewrite_authority, BrowserVersion, DevToolsSession, DevToolsTransport,
    SUPPORTED_EVENTS,
};
pub use error::{CoreError, Result};
pub use host::CommandHost;
pub use wait::{EventWait, WaitOutcome, Waited};
