//! Prepared statement handle.
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    codec::CodecError,
    connection::Request,
    deferred::{Deferred, deferred},
    row::{Field, QueryResult},
    types::Value,
};

/// Server side description of a prepared statement.
#[derive(Debug)]
pub struct StatementMeta {
    pub id: u32,
    pub param_count: usize,
    pub columns: Vec<Field>,
}

/// A statement prepared on one [`Connection`][crate::Connection].
///
/// Dropping the handle schedules a `COM_STMT_CLOSE`, which the connection
/// writes out the next time it is idle.
#[derive(Debug)]
pub struct Statement {
    meta: Arc<StatementMeta>,
    send: UnboundedSender<Request>,
}

impl Statement {
    pub(crate) fn new(meta: Arc<StatementMeta>, send: UnboundedSender<Request>) -> Self {
        Self { meta, send }
    }

    /// Server assigned statement id.
    pub fn id(&self) -> u32 {
        self.meta.id
    }

    pub fn param_count(&self) -> usize {
        self.meta.param_count
    }

    /// Columns of the result set this statement produces.
    pub fn columns(&self) -> &[Field] {
        &self.meta.columns
    }

    /// Queue the statement for execution.
    pub fn execute(&self, params: Vec<Value>) -> Deferred<QueryResult> {
        let (tx, rx) = deferred();

        // a wrong parameter count never reaches the wire
        if params.len() != self.meta.param_count {
            tx.reject(
                CodecError::ParamCount { expected: self.meta.param_count, got: params.len() }
                    .into(),
            );
            return rx;
        }

        // a send failure drops `tx`, rejecting `rx` with ConnectionClosed
        let _ = self.send.send(Request::Execute {
            meta: Arc::clone(&self.meta),
            params,
            tx,
        });
        rx
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        let _ = self.send.send(Request::CloseStmt { id: self.meta.id });
    }
}
