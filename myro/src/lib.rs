//! MySQL Driver
//!
//! # Examples
//!
//! ```no_run
//! use myro::{Connection, Value};
//!
//! # async fn app() -> myro::Result<()> {
//! let conn = Connection::connect_env().await?;
//!
//! let res = conn.query("SELECT 420").await?;
//! assert_eq!(res.rows()[0][0], Value::Int(420));
//!
//! let stmt = conn.prepare("SELECT ?").await?;
//! let res = stmt.execute(vec![Value::Int(42)]).await?;
//! assert_eq!(res.rows()[0][0], Value::Int(42));
//! # Ok(())
//! # }
//! ```
//!
//! Commands on one connection run strictly in submission order, so they
//! can be queued without awaiting each one first:
//!
//! ```no_run
//! # async fn app() -> myro::Result<()> {
//! # let conn = myro::Connection::connect_env().await?;
//! let a = conn.query("INSERT INTO foo(id) VALUES(1)");
//! let b = conn.query("SELECT * FROM foo");
//!
//! a.await?;
//! let rows = b.await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod net;

// Encoding
pub mod codec;
pub mod charset;
pub mod types;

// Protocol
pub mod mysql;
pub mod packet;
#[cfg(feature = "tokio")]
pub mod stream;
#[cfg(feature = "tokio")]
pub mod protocol;

// Component
pub mod deferred;
pub mod row;
#[cfg(feature = "tokio")]
pub mod statement;

// Connection
pub mod connection;

mod error;

pub use charset::Charset;
pub use connection::{Config, Connection};
pub use error::{ConnectionClosed, Error, ErrorKind, Result, TimeoutError};
pub use row::{Field, QueryResult, ResultSet, Row};
#[cfg(feature = "tokio")]
pub use statement::Statement;
pub use types::{DateTime, Time, Value};
