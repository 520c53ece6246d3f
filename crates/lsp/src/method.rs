//! Method classification.

use lsp_types::notification::{
	Cancel, DidChangeTextDocument, DidChangeWatchedFiles, DidCloseTextDocument, DidOpenTextDocument,
	Notification,
};

/// Notifications whose processing may be deferred behind newer work.
const DELAYABLE_NOTIFICATIONS: &[&str] = &[
	DidOpenTextDocument::METHOD,
	DidChangeTextDocument::METHOD,
	DidCloseTextDocument::METHOD,
	DidChangeWatchedFiles::METHOD,
];

/// Method of the request cancellation notification.
pub const CANCEL_REQUEST: &str = Cancel::METHOD;

/// Returns true if a notification for `method` may be delayed behind newer messages.
pub fn is_delayable_notification(method: &str) -> bool {
	DELAYABLE_NOTIFICATIONS.contains(&method)
}
