//! Inbound dispatch: channel frames -> view mutations.
//!
//! [`InboundRouter::route`] is synchronous and handles one frame.
//! [`spawn_routers`] runs one task per endpoint that feeds it frames in
//! arrival order and reports channel readiness on the event bus.

use std::sync::Arc;

use framesync_channels::messages::{self, ShareMessage};
use framesync_channels::{ChannelRegistry, ChannelState, Endpoint};
use framesync_events::{NoticeLevel, SessionEvent};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::export_session::ExportSession;
use crate::view::SharedView;
use crate::watchdog::ResponseWatchdog;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    Applied,
    /// Well-formed but carried nothing to apply.
    Ignored,
    /// Unparseable; logged and dropped without touching the view.
    Malformed,
}

pub struct InboundRouter {
    view: Arc<SharedView>,
    exports: Arc<ExportSession>,
    watchdog: Arc<ResponseWatchdog>,
}

impl InboundRouter {
    pub fn new(
        view: Arc<SharedView>,
        exports: Arc<ExportSession>,
        watchdog: Arc<ResponseWatchdog>,
    ) -> Self {
        Self {
            view,
            exports,
            watchdog,
        }
    }

    pub fn route(&self, endpoint: Endpoint, text: &str) -> RouteOutcome {
        let outcome = match endpoint {
            Endpoint::Pagination => self.route_page(text),
            e if e.carries_results() => self.route_results(e, text),
            Endpoint::ShareImage => self.route_share(text),
            Endpoint::ShareQuery => self.route_shared_query(text),
            Endpoint::Alerts => self.route_alert(text),
            Endpoint::Log => self.route_log(text),
            _ => RouteOutcome::Ignored,
        };
        if outcome == RouteOutcome::Malformed {
            tracing::warn!(%endpoint, len = text.len(), "Dropping malformed message");
        }
        outcome
    }

    fn route_results(&self, endpoint: Endpoint, text: &str) -> RouteOutcome {
        let Ok(push) = messages::parse_search_push(text) else {
            return RouteOutcome::Malformed;
        };
        if let Some(error) = push.error.clone() {
            tracing::warn!(%endpoint, %error, "Backend reported a search error");
            self.watchdog.resolve(endpoint);
            self.view.notify(NoticeLevel::Error, error);
            return RouteOutcome::Applied;
        }
        match push.into_batch() {
            Some(batch) => {
                self.view.replace_results(batch);
                self.watchdog.resolve(endpoint);
                RouteOutcome::Applied
            }
            None => {
                tracing::warn!(%endpoint, "Results push without results");
                RouteOutcome::Ignored
            }
        }
    }

    fn route_page(&self, text: &str) -> RouteOutcome {
        let Ok(push) = messages::parse_search_push(text) else {
            return RouteOutcome::Malformed;
        };
        self.watchdog.resolve(Endpoint::Pagination);
        if let Some(error) = push.error.clone() {
            self.view.notify(NoticeLevel::Error, error);
            return RouteOutcome::Applied;
        }
        let page = push.page.unwrap_or(0);
        match push.into_batch() {
            Some(batch) if !batch.is_empty() => {
                self.view.append_page(batch, page);
                RouteOutcome::Applied
            }
            _ => {
                tracing::info!(page, "No more results");
                RouteOutcome::Ignored
            }
        }
    }

    fn route_share(&self, text: &str) -> RouteOutcome {
        match messages::parse_share_message(text) {
            Ok(ShareMessage::ImageShare {
                frame_id,
                src,
                frame_info,
            }) => {
                self.exports.add_remote(frame_id, &src, &frame_info);
                RouteOutcome::Applied
            }
            Ok(ShareMessage::VqaInputUpdate { frame_id, vqa_input }) => {
                self.exports.annotate_remote(frame_id, &vqa_input);
                RouteOutcome::Applied
            }
            Err(_) => RouteOutcome::Malformed,
        }
    }

    fn route_shared_query(&self, text: &str) -> RouteOutcome {
        match messages::parse_shared_query(text) {
            Ok(shared) => {
                self.view.record_shared_query(&shared.query);
                RouteOutcome::Applied
            }
            Err(_) => RouteOutcome::Malformed,
        }
    }

    fn route_alert(&self, text: &str) -> RouteOutcome {
        match messages::parse_alert(text) {
            Ok(alert) if alert.message.is_empty() => RouteOutcome::Ignored,
            Ok(alert) => {
                self.view.notify(NoticeLevel::Info, alert.message);
                RouteOutcome::Applied
            }
            Err(_) => RouteOutcome::Malformed,
        }
    }

    fn route_log(&self, text: &str) -> RouteOutcome {
        match messages::parse_log_reply(text) {
            Ok(reply) => {
                tracing::info!(message = %reply.message, "Log server reply");
                RouteOutcome::Applied
            }
            Err(_) => RouteOutcome::Malformed,
        }
    }
}

/// Start one routing task per endpoint. Every channel is opened here.
///
/// Each task subscribes before returning, so no frame that arrives after
/// this call is missed.
pub fn spawn_routers(
    registry: &ChannelRegistry,
    router: Arc<InboundRouter>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    Endpoint::ALL
        .into_iter()
        .map(|endpoint| {
            let connection = registry.get(endpoint);
            let mut inbound = connection.subscribe();
            let mut states = connection.state_changes();
            let router = Arc::clone(&router);
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let mut ready = false;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        frame = inbound.recv() => match frame {
                            Ok(text) => {
                                router.route(endpoint, &text);
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                tracing::warn!(%endpoint, skipped, "Router lagged, frames lost");
                            }
                            Err(RecvError::Closed) => break,
                        },
                        changed = states.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let now_ready = *states.borrow_and_update() == ChannelState::Open;
                            if now_ready != ready {
                                ready = now_ready;
                                router.view.bus().publish(SessionEvent::ChannelStatus {
                                    endpoint: endpoint.name().to_string(),
                                    ready,
                                });
                            }
                        }
                    }
                }
                tracing::debug!(%endpoint, "Router task exited");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use framesync_channels::loopback::LoopbackConnector;
    use framesync_channels::ReconnectPolicy;
    use framesync_core::types::{ExportEntry, Origin};
    use framesync_events::EventBus;

    use super::*;

    struct Fixture {
        view: Arc<SharedView>,
        exports: Arc<ExportSession>,
        watchdog: Arc<ResponseWatchdog>,
        router: InboundRouter,
    }

    fn fixture() -> Fixture {
        let view = Arc::new(SharedView::new(Arc::new(EventBus::default())));
        let (connector, _acceptor) = LoopbackConnector::new();
        let registry = Arc::new(ChannelRegistry::new(
            "ws://loopback",
            connector,
            ReconnectPolicy::default(),
        ));
        let exports = Arc::new(ExportSession::new(Arc::clone(&view), registry, true));
        let watchdog = ResponseWatchdog::new(Arc::clone(&view), None);
        let router = InboundRouter::new(
            Arc::clone(&view),
            Arc::clone(&exports),
            Arc::clone(&watchdog),
        );
        Fixture {
            view,
            exports,
            watchdog,
            router,
        }
    }

    fn hits(ids: &[i64]) -> String {
        let items: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"id":{id},"entity":{{"video":"L01_V001","frame_id":{id},"time":1.0}}}}"#
                )
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn results_push_replaces_and_clears_loading() {
        let f = fixture();
        f.view.set_loading(true);
        let push = format!(r#"{{"kq":{}}}"#, hits(&[1, 2, 3]));
        let outcome = f.router.route(Endpoint::Results, &push);
        assert_eq!(outcome, RouteOutcome::Applied);
        assert_eq!(f.view.visible_results().len(), 3);
        assert!(!f.view.is_loading());
    }

    #[test]
    fn push_on_another_endpoint_keeps_loading() {
        let f = fixture();
        f.watchdog.arm(Endpoint::Results);
        f.watchdog.arm(Endpoint::Filter);

        f.router.route(Endpoint::Filter, &format!(r#"{{"kq":{}}}"#, hits(&[7])));
        assert!(f.view.is_loading());
        assert!(f.watchdog.is_pending(Endpoint::Results));

        f.router.route(Endpoint::Results, &format!(r#"{{"kq":{}}}"#, hits(&[1, 2])));
        assert!(!f.view.is_loading());
    }

    #[test]
    fn malformed_push_leaves_view_untouched() {
        let f = fixture();
        f.router.route(Endpoint::Filter, &format!(r#"{{"kq":{}}}"#, hits(&[1])));
        assert_eq!(f.router.route(Endpoint::Filter, "{not json"), RouteOutcome::Malformed);
        assert_eq!(f.view.visible_results().len(), 1);
    }

    #[test]
    fn error_push_clears_loading_and_keeps_results() {
        let f = fixture();
        f.router.route(Endpoint::Similarity, &format!(r#"{{"kq":{}}}"#, hits(&[1])));
        f.view.set_loading(true);
        assert_eq!(
            f.router.route(Endpoint::Similarity, r#"{"error":"no vector"}"#),
            RouteOutcome::Applied
        );
        assert!(!f.view.is_loading());
        assert_eq!(f.view.visible_results().len(), 1);
    }

    #[test]
    fn pages_apply_in_sequence_only() {
        let f = fixture();
        f.router.route(Endpoint::Pagination, &format!(r#"{{"kq":{},"page":0}}"#, hits(&[1, 2])));
        f.router.route(Endpoint::Pagination, &format!(r#"{{"kq":{},"page":2}}"#, hits(&[5])));
        f.router.route(Endpoint::Pagination, &format!(r#"{{"kq":{},"page":1}}"#, hits(&[3, 4])));
        f.router.route(Endpoint::Pagination, &format!(r#"{{"kq":{},"page":1}}"#, hits(&[3, 4])));

        let ids: Vec<i64> = f.view.visible_results().iter().map(|i| i.frame_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(f.view.next_page(), 2);
    }

    #[test]
    fn empty_page_means_no_more_results() {
        let f = fixture();
        assert_eq!(
            f.router.route(Endpoint::Pagination, r#"{"kq":[],"page":0}"#),
            RouteOutcome::Ignored
        );
        assert_eq!(f.view.next_page(), 0);
    }

    #[test]
    fn remote_share_then_local_duplicate() {
        let f = fixture();
        let share = r#"{"type":"image_share","frameId":42,
            "src":"/k/L01_V001/0042.jpg","frameInfo":"L01_V001-1.68"}"#;
        assert_eq!(f.router.route(Endpoint::ShareImage, share), RouteOutcome::Applied);

        let entries = f.exports.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].origin, Origin::Remote);
        assert_eq!(entries[0].video_frame_key, "L01_V001/0042");

        assert_eq!(
            f.exports.add_local(42, "/other/root/L01_V001/0042.webp", "L01_V001-1.68"),
            crate::export_session::ExportOutcome::Duplicate
        );
        assert_eq!(f.exports.entries().len(), 1);
    }

    #[test]
    fn remote_annotation_overwrites_local() {
        let f = fixture();
        f.view.insert_export(ExportEntry::new(7, "/k/V/0007.jpg", "V-1", Origin::Local));
        f.router.route(
            Endpoint::ShareImage,
            r#"{"type":"vqa_input_update","frameId":7,"vqaInput":"red"}"#,
        );
        assert_eq!(f.view.read(|s| s.annotation(7).map(str::to_string)), Some("red".into()));
    }

    #[test]
    fn shared_query_and_alert_reach_the_bus() {
        let f = fixture();
        let mut rx = f.view.bus().subscribe();

        f.router.route(Endpoint::ShareQuery, r#"{"type":"shared_query","query":"two dogs"}"#);
        f.router.route(Endpoint::Alerts, r#"{"type":"alert","message":"submit now"}"#);

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::SharedQueryReceived { query } if query == "two dogs"
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::Notice(n) if n.message == "submit now"
        ));
        assert_eq!(f.view.shared_history()[0].query, "two dogs");
    }
}
