//! Command/response state machine on top of [`PacketStream`].
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    ErrorKind, Result,
    charset::Charset,
    codec::CodecError,
    common::{ByteStr, span, verbose},
    mysql::{self, Command, capability},
    packet::{Auth, Eof, Execute, Handshake, OkPacket, PrepareOk, ProtocolError, ResultHeader},
    row::{Field, QueryResult, ResultSet, Row},
    statement::StatementMeta,
    stream::PacketStream,
    types::Value,
};

/// Connection lifecycle state.
///
/// Commands are only accepted while `Ready`. Any mid-command failure
/// returns the state to `Ready` so the connection stays usable, except
/// transport failures which drop it back to `Init`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    /// No session established.
    Init,
    /// Idle between commands.
    Ready,
    /// Command sent, awaiting the first response packet.
    Process,
    /// Reading field descriptors.
    Field,
    /// Reading rows.
    Result,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Process => "processing a command",
            Self::Field => "reading fields",
            Self::Result => "reading rows",
        }
    }
}

enum RowFormat {
    Text,
    Binary,
}

/// A single authenticated MySQL session.
pub struct Protocol<S> {
    stream: PacketStream<S>,
    state: State,
    charset: Charset,
    thread_id: u32,
    server_version: ByteStr,
    server_status: u16,
    pending_closes: Vec<u32>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Protocol<S> {
    pub fn new(stream: PacketStream<S>) -> Self {
        Self {
            stream,
            state: State::Init,
            charset: Charset::Utf8,
            thread_id: 0,
            server_version: ByteStr::default(),
            server_status: 0,
            pending_closes: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Connection id the server assigned during the handshake.
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn server_status(&self) -> u16 {
        self.server_status
    }

    /// Read the server greeting, answer it, and set the session charset.
    ///
    /// `flags` is OR-ed into the default capability set.
    pub async fn authenticate(
        &mut self,
        user: &str,
        password: &str,
        database: Option<&str>,
        flags: u32,
        charset: Charset,
    ) -> Result<()> {
        span!("authenticate");

        if self.state != State::Init {
            return Err(ProtocolError::OutOfSync {
                operation: "authenticate",
                state: self.state.name(),
            }
            .into());
        }

        match self.authenticate_inner(user, password, database, flags, charset).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = State::Init;
                Err(err)
            }
        }
    }

    async fn authenticate_inner(
        &mut self,
        user: &str,
        password: &str,
        database: Option<&str>,
        flags: u32,
        charset: Charset,
    ) -> Result<()> {
        self.stream.reset();
        let greeting = Handshake::parse(self.stream.recv().await?)?;

        verbose!(
            "server version {}, thread id {}",
            greeting.server_version,
            greeting.thread_id,
        );

        self.thread_id = greeting.thread_id;
        self.server_version = greeting.server_version;
        self.server_status = greeting.status;
        self.charset = charset;

        let token = mysql::scramble(password, &greeting.scramble);

        let mut capabilities = capability::LONG_PASSWORD
            | capability::LONG_FLAG
            | capability::LOCAL_FILES
            | capability::PROTOCOL_41
            | capability::TRANSACTIONS
            | capability::SECURE_CONNECTION
            | flags;
        if database.is_some() {
            capabilities |= capability::CONNECT_WITH_DB;
        }

        let mut payload = BytesMut::new();
        Auth {
            capabilities,
            max_packet: mysql::DEFAULT_MAX_ALLOWED_PACKET,
            charset_id: charset.id(),
            user,
            token: &token,
            database,
        }
        .encode(&mut payload)?;
        self.stream.send(&payload);
        self.stream.flush().await?;

        let reply = self.stream.recv().await?;
        match reply.first() {
            Some(0x00) => {
                let ok = OkPacket::parse(reply)?;
                self.server_status = ok.status;
            }
            // an auth switch request means the server insists on a
            // method this client does not speak
            Some(0xFE) => return Err(ProtocolError::UnsupportedAuth.into()),
            Some(&first) => {
                return Err(ProtocolError::UnexpectedPacket { expected: "ok", got: first }.into());
            }
            None => return Err(ProtocolError::ShortPacket("ok").into()),
        }

        self.state = State::Ready;
        self.query(&format!("SET NAMES {}", charset.name())).await?;
        Ok(())
    }

    /// Run one statement through the text protocol.
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        span!("query");
        verbose!("query: {sql}");

        self.begin("query")?;
        let res = self.query_inner(sql).await;
        self.settle(res)
    }

    async fn query_inner(&mut self, sql: &str) -> Result<QueryResult> {
        let mut payload = BytesMut::with_capacity(sql.len() + 1);
        payload.put_u8(Command::Query as u8);
        payload.put_slice(sql.as_bytes());
        self.stream.send(&payload);
        self.stream.flush().await?;
        self.read_result(RowFormat::Text).await
    }

    /// Prepare a statement on the server.
    pub async fn prepare(&mut self, sql: &str) -> Result<StatementMeta> {
        span!("prepare");
        verbose!("prepare: {sql}");

        self.begin("prepare")?;
        let res = self.prepare_inner(sql).await;
        self.settle(res)
    }

    async fn prepare_inner(&mut self, sql: &str) -> Result<StatementMeta> {
        let mut payload = BytesMut::with_capacity(sql.len() + 1);
        payload.put_u8(Command::StmtPrepare as u8);
        payload.put_slice(sql.as_bytes());
        self.stream.send(&payload);
        self.stream.flush().await?;

        let ok = PrepareOk::parse(self.stream.recv().await?)?;
        self.state = State::Field;

        // parameter descriptors carry no typing before the first execute,
        // skip them as a batch
        if ok.param_count > 0 {
            self.stream.recv_many(ok.param_count as usize).await?;
            self.expect_eof().await?;
        }

        let mut columns = Vec::with_capacity(ok.field_count as usize);
        if ok.field_count > 0 {
            for _ in 0..ok.field_count {
                columns.push(Field::parse(self.stream.recv().await?)?);
            }
            self.expect_eof().await?;
        }

        self.state = State::Ready;
        Ok(StatementMeta { id: ok.statement_id, param_count: ok.param_count as usize, columns })
    }

    /// Run a prepared statement through the binary protocol.
    pub async fn execute(&mut self, stmt: &StatementMeta, params: &[Value]) -> Result<QueryResult> {
        span!("execute");

        if params.len() != stmt.param_count {
            // caller mistake, the connection state is untouched
            return Err(CodecError::ParamCount {
                expected: stmt.param_count,
                got: params.len(),
            }
            .into());
        }

        self.begin("execute")?;
        let res = self.execute_inner(stmt, params).await;
        self.settle(res)
    }

    async fn execute_inner(&mut self, stmt: &StatementMeta, params: &[Value]) -> Result<QueryResult> {
        let mut payload = BytesMut::new();
        Execute { statement_id: stmt.id, params, charset: self.charset }.encode(&mut payload)?;
        self.stream.send(&payload);
        self.stream.flush().await?;
        self.read_result(RowFormat::Binary).await
    }

    /// `COM_SET_OPTION` with a 16-bit option value.
    pub async fn set_option(&mut self, option: u16) -> Result<QueryResult> {
        span!("set_option");

        self.begin("set option")?;
        let res = self.set_option_inner(option).await;
        self.settle(res)
    }

    async fn set_option_inner(&mut self, option: u16) -> Result<QueryResult> {
        let mut payload = BytesMut::with_capacity(3);
        payload.put_u8(Command::SetOption as u8);
        payload.put_u16_le(option);
        self.stream.send(&payload);
        self.stream.flush().await?;
        self.read_result(RowFormat::Text).await
    }

    /// Check the connection is alive.
    pub async fn ping(&mut self) -> Result<()> {
        span!("ping");

        self.begin("ping")?;
        let res = self.ping_inner().await;
        self.settle(res)
    }

    async fn ping_inner(&mut self) -> Result<()> {
        self.stream.send(&[Command::Ping as u8]);
        self.stream.flush().await?;
        match ResultHeader::parse(self.stream.recv().await?)? {
            ResultHeader::Ok(ok) => {
                self.server_status = ok.status;
                self.state = State::Ready;
                Ok(())
            }
            _ => Err(ProtocolError::UnexpectedPacket { expected: "ok", got: 0 }.into()),
        }
    }

    /// Send the terminating command. The server replies by closing.
    pub async fn quit(&mut self) -> Result<()> {
        if self.state == State::Init {
            return Ok(());
        }
        self.stream.reset();
        self.stream.send(&[Command::Quit as u8]);
        let res = self.stream.flush().await;
        self.state = State::Init;
        res
    }

    /// Queue a statement id for closing.
    ///
    /// `COM_STMT_CLOSE` has no response and may not interrupt a command
    /// in flight, so closes are spooled and written out while idle.
    pub fn defer_close(&mut self, statement_id: u32) {
        self.pending_closes.push(statement_id);
    }

    /// Write out spooled statement closes, if the connection is idle.
    pub async fn flush_pending_closes(&mut self) -> Result<()> {
        if self.state != State::Ready || self.pending_closes.is_empty() {
            return Ok(());
        }
        for id in std::mem::take(&mut self.pending_closes) {
            verbose!("closing statement {id}");
            self.stream.reset();
            let mut payload = BytesMut::with_capacity(5);
            payload.put_u8(Command::StmtClose as u8);
            payload.put_u32_le(id);
            self.stream.send(&payload);
        }
        let res = self.stream.flush().await;
        self.settle(res)
    }

    /// Move `Ready -> Process` and restart packet numbering.
    fn begin(&mut self, operation: &'static str) -> Result<()> {
        if self.state != State::Ready {
            return Err(ProtocolError::OutOfSync { operation, state: self.state.name() }.into());
        }
        self.state = State::Process;
        self.stream.reset();
        Ok(())
    }

    /// Route a command outcome through the state machine.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.state = match err.kind() {
                ErrorKind::Io(_) | ErrorKind::Closed(_) | ErrorKind::Timeout(_) => State::Init,
                _ => State::Ready,
            };
        }
        result
    }

    /// Classify the first response packet and drain whatever follows.
    async fn read_result(&mut self, format: RowFormat) -> Result<QueryResult> {
        match ResultHeader::parse(self.stream.recv().await?)? {
            ResultHeader::Ok(ok) => {
                self.server_status = ok.status;
                self.state = State::Ready;
                Ok(QueryResult::Ok(ok))
            }
            // a bare end marker acknowledges commands like set option
            ResultHeader::Eof(eof) => {
                self.server_status = eof.status;
                self.state = State::Ready;
                Ok(QueryResult::Ok(OkPacket {
                    status: eof.status,
                    warnings: eof.warnings,
                    ..Default::default()
                }))
            }
            ResultHeader::Fields(count) => {
                self.state = State::Field;
                let fields = self.retr_fields(count as usize).await?;
                let rows = match format {
                    RowFormat::Text => self.retr_all_records(&fields).await?,
                    RowFormat::Binary => self.stmt_retr_all_records(&fields).await?,
                };
                Ok(QueryResult::ResultSet(ResultSet { fields, rows }))
            }
            ResultHeader::LocalInfile(file) => {
                let ok = self.send_local_file(&file).await?;
                self.server_status = ok.status;
                self.state = State::Ready;
                Ok(QueryResult::Ok(ok))
            }
        }
    }

    /// Read exactly `count` field descriptors and their end marker.
    async fn retr_fields(&mut self, count: usize) -> Result<Vec<Field>> {
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(Field::parse(self.stream.recv().await?)?);
        }
        self.expect_eof().await?;
        self.state = State::Result;
        Ok(fields)
    }

    /// Read text rows until the end marker.
    async fn retr_all_records(&mut self, fields: &[Field]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        loop {
            let payload = self.stream.recv().await?;
            if Eof::is(&payload) {
                self.server_status = Eof::parse(payload)?.status;
                break;
            }
            rows.push(Row::parse_text(payload, fields)?);
        }
        self.state = State::Ready;
        Ok(rows)
    }

    /// Read binary rows until the end marker.
    async fn stmt_retr_all_records(&mut self, fields: &[Field]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        loop {
            let payload = self.stream.recv().await?;
            if Eof::is(&payload) {
                self.server_status = Eof::parse(payload)?.status;
                break;
            }
            rows.push(Row::parse_binary(payload, fields)?);
        }
        self.state = State::Ready;
        Ok(rows)
    }

    async fn expect_eof(&mut self) -> Result<Eof> {
        let payload = self.stream.recv().await?;
        if !Eof::is(&payload) {
            return Err(ProtocolError::UnexpectedPacket {
                expected: "eof",
                got: payload.first().copied().unwrap_or(0),
            }
            .into());
        }
        Ok(Eof::parse(payload)?)
    }

    /// Stream the local file the server asked for, then read its report.
    ///
    /// An empty packet ends the transfer even when the file is unreadable,
    /// otherwise the connection would hang mid-command.
    async fn send_local_file(&mut self, path: &str) -> Result<OkPacket> {
        verbose!("local infile: {path}");

        let data = std::fs::read(path);

        if let Ok(data) = &data {
            // keep each chunk under the frame limit so no chunk grows its
            // own continuation frame
            for chunk in data.chunks(mysql::MAX_PACKET_LEN - 1) {
                self.stream.send(chunk);
            }
        }
        self.stream.send(&[]);
        self.stream.flush().await?;

        let reply = self.stream.recv().await?;
        let ok = match ResultHeader::parse(reply)? {
            ResultHeader::Ok(ok) => ok,
            _ => return Err(ProtocolError::UnexpectedPacket { expected: "ok", got: 0 }.into()),
        };

        match data {
            Ok(_) => Ok(ok),
            Err(err) => Err(err.into()),
        }
    }
}

impl<S> std::fmt::Debug for Protocol<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("state", &self.state)
            .field("thread_id", &self.thread_id)
            .field("server_version", &self.server_version)
            .finish()
    }
}
