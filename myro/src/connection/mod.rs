//! MySQL connection front end.
mod config;

pub use config::{Config, ParseError};

#[cfg(feature = "tokio")]
mod worker;

#[cfg(feature = "tokio")]
pub(crate) use worker::Request;

/// Handle to a MySQL connection driven by a background task.
///
/// Commands are queued and run strictly in submission order, one at a
/// time. Every method hands back a [`Deferred`][crate::deferred::Deferred]
/// that resolves when the server's response has been read. Cloning the
/// handle shares the same connection.
#[derive(Clone, Debug)]
pub struct Connection {
    #[cfg(feature = "tokio")]
    send: tokio::sync::mpsc::UnboundedSender<Request>,
}

#[cfg(feature = "tokio")]
impl Connection {
    /// Connect and authenticate with a `mysql://` url.
    pub async fn connect(url: &str) -> crate::Result<Connection> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect and authenticate from environment variables.
    ///
    /// See [`Config::from_env`] for the variables read.
    pub async fn connect_env() -> crate::Result<Connection> {
        Self::connect_with(Config::from_env()).await
    }

    /// Connect and authenticate with the given config.
    pub async fn connect_with(config: Config) -> crate::Result<Connection> {
        use crate::net::Socket;

        let socket = match &config.socket {
            Some(path) => Socket::connect_unix(path).await?,
            None => Socket::connect_tcp(&config.host, config.port).await?,
        };
        Self::connect_stream(socket, &config).await
    }

    /// Authenticate over an already established duplex stream.
    pub async fn connect_stream<S>(stream: S, config: &Config) -> crate::Result<Connection>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        use crate::{charset::Charset, protocol::Protocol, stream::PacketStream};

        let charset = Charset::from_name(&config.charset)
            .ok_or_else(|| ParseError::new(format!("unknown charset `{}`", config.charset)))?;

        let mut transport = PacketStream::new(stream);
        transport.set_read_timeout(config.read_timeout);

        let mut protocol = Protocol::new(transport);
        let database = (!config.dbname.is_empty()).then(|| config.dbname.as_str());
        protocol
            .authenticate(&config.user, &config.pass, database, 0, charset)
            .await?;

        let (send, recv) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(worker::run(protocol, send.clone(), recv));
        Ok(Connection { send })
    }

    fn submit<T>(
        &self,
        request: impl FnOnce(crate::deferred::Complete<T>) -> Request,
    ) -> crate::deferred::Deferred<T> {
        let (tx, rx) = crate::deferred::deferred();
        // a failed send drops `tx`, rejecting `rx` with ConnectionClosed
        let _ = self.send.send(request(tx));
        rx
    }

    /// Queue a statement for execution through the text protocol.
    pub fn query(&self, sql: impl Into<String>) -> crate::deferred::Deferred<crate::QueryResult> {
        let sql = sql.into();
        self.submit(|tx| Request::Query { sql, tx })
    }

    /// Queue a statement for preparation.
    pub fn prepare(&self, sql: impl Into<String>) -> crate::deferred::Deferred<crate::Statement> {
        let sql = sql.into();
        self.submit(|tx| Request::Prepare { sql, tx })
    }

    /// Queue a `COM_SET_OPTION`.
    pub fn set_option(&self, option: u16) -> crate::deferred::Deferred<crate::QueryResult> {
        self.submit(|tx| Request::SetOption { option, tx })
    }

    /// Queue a liveness check.
    pub fn ping(&self) -> crate::deferred::Deferred<()> {
        self.submit(|tx| Request::Ping { tx })
    }

    /// Close the connection after everything queued so far has run.
    ///
    /// Commands submitted after the close resolve with an error.
    pub fn close(&self) -> crate::deferred::Deferred<()> {
        self.submit(|tx| Request::Close { tx })
    }
}
