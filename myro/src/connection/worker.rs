use std::{collections::VecDeque, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
};

use crate::{
    common::verbose,
    deferred::Complete,
    protocol::Protocol,
    row::QueryResult,
    statement::{Statement, StatementMeta},
    types::Value,
};

/// A queued command from a connection or statement handle.
pub(crate) enum Request {
    Query { sql: String, tx: Complete<QueryResult> },
    Prepare { sql: String, tx: Complete<Statement> },
    Execute { meta: Arc<StatementMeta>, params: Vec<Value>, tx: Complete<QueryResult> },
    SetOption { option: u16, tx: Complete<QueryResult> },
    Ping { tx: Complete<()> },
    CloseStmt { id: u32 },
    Close { tx: Complete<()> },
}

/// Drive one connection, one command at a time, in submission order.
///
/// Statement closes are the exception: they are pulled out of the queue
/// and spooled into the protocol, which writes them while idle. Exits
/// when every handle is dropped or an explicit close arrives, rejecting
/// whatever is still queued.
pub(crate) async fn run<S>(
    mut protocol: Protocol<S>,
    send: UnboundedSender<Request>,
    mut recv: UnboundedReceiver<Request>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut queue = VecDeque::new();

    loop {
        // pull in everything submitted so far
        while let Ok(req) = recv.try_recv() {
            queue.push_back(req);
        }

        // statement closes do not wait in line
        let mut i = 0;
        while i < queue.len() {
            if let Request::CloseStmt { id } = queue[i] {
                protocol.defer_close(id);
                queue.remove(i);
            } else {
                i += 1;
            }
        }

        if let Err(_err) = protocol.flush_pending_closes().await {
            #[cfg(feature = "log")]
            log::error!("statement close failed: {_err}");
        }

        let req = match queue.pop_front() {
            Some(req) => req,
            None => match recv.recv().await {
                Some(req) => {
                    queue.push_back(req);
                    continue;
                }
                // every handle is gone
                None => break,
            },
        };

        match req {
            Request::Query { sql, tx } => match protocol.query(&sql).await {
                Ok(res) => tx.resolve(res),
                Err(err) => tx.reject(err),
            },
            Request::Prepare { sql, tx } => match protocol.prepare(&sql).await {
                Ok(meta) => tx.resolve(Statement::new(Arc::new(meta), send.clone())),
                Err(err) => tx.reject(err),
            },
            Request::Execute { meta, params, tx } => {
                match protocol.execute(&meta, &params).await {
                    Ok(res) => tx.resolve(res),
                    Err(err) => tx.reject(err),
                }
            }
            Request::SetOption { option, tx } => match protocol.set_option(option).await {
                Ok(res) => tx.resolve(res),
                Err(err) => tx.reject(err),
            },
            Request::Ping { tx } => match protocol.ping().await {
                Ok(()) => tx.resolve(()),
                Err(err) => tx.reject(err),
            },
            Request::CloseStmt { id } => protocol.defer_close(id),
            Request::Close { tx } => {
                verbose!("connection close requested");
                let _ = protocol.quit().await;
                tx.resolve(());
                return;
            }
        }
    }

    let _ = protocol.quit().await;
}
