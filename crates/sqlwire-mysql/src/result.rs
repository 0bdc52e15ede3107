//! Response interpretation and result-set decoding.
//!
//! A query response is one of
//! - OK: `0x00`, affected rows, last insert id, status, warnings
//! - ERR: `0xFF`, code, optional `#` + SQL state, message
//! - a result set: column count, column definitions, EOF, rows, EOF
//!
//! Result sets may be chained with the MORE_RESULTS_EXISTS status bit.

use crate::protocol::{EofPacket, OkPacket, PacketReader, is_eof_packet};
use crate::socket::Socket;
use crate::transport::read_packet;
use crate::types::{FieldType, decode_text_value};
use sqlwire_core::{Column, ColumnInfo, Error, Result, Row, Value};
use std::sync::Arc;

/// First packet of a response, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(OkPacket),
    /// A result set with this many columns follows.
    ResultSet(u64),
}

/// Classify a response payload. ERR packets become `Error::Server`.
#[allow(clippy::result_large_err)]
pub fn interpret_response(payload: &[u8]) -> Result<Response> {
    let mut reader = PacketReader::new(payload);
    match reader.peek() {
        None => Err(Error::data_reading("empty response packet")),
        Some(0x00) => reader.parse_ok_packet().map(Response::Ok),
        Some(0xFF) => Err(Error::Server(reader.parse_err_packet()?)),
        Some(_) => reader
            .read_lenenc_int_required("column count")
            .map(Response::ResultSet),
    }
}

/// Read and discard packets up to and including the next EOF.
///
/// Returns the EOF so its status flags can be inspected. An ERR packet on
/// the way is raised.
#[allow(clippy::result_large_err)]
pub fn read_until_eof<S: Socket + ?Sized>(socket: &mut S) -> Result<EofPacket> {
    loop {
        let packet = read_packet(socket)?;
        if is_eof_packet(&packet.payload) {
            return PacketReader::new(&packet.payload).parse_eof_packet();
        }
        if packet.payload.first() == Some(&0xFF) {
            return Err(Error::Server(
                PacketReader::new(&packet.payload).parse_err_packet()?,
            ));
        }
    }
}

/// Decode a column definition packet.
///
/// catalog, schema, table, org_table, name, org_name (all lenenc), then a
/// filler/length byte, charset (2), column length (4), type (1), flags (2).
#[allow(clippy::result_large_err)]
pub fn parse_column_definition(payload: &[u8]) -> Result<Column> {
    let mut reader = PacketReader::new(payload);
    let _catalog = reader.read_lenenc_bytes()?;
    let _schema = reader.read_lenenc_bytes()?;
    let table = reader
        .read_lenenc_string()?
        .ok_or_else(|| Error::data_reading("column definition has a NULL table name"))?;
    let _org_table = reader.read_lenenc_bytes()?;
    let name = reader
        .read_lenenc_string()?
        .ok_or_else(|| Error::data_reading("column definition has a NULL column name"))?;
    let _org_name = reader.read_lenenc_bytes()?;
    reader.skip(7)?;
    let type_code = reader.read_u8()?;
    let flags = reader.read_u16_le()?;
    Ok(Column::new(name, table, type_code, flags))
}

/// Read `count` column definitions followed by the terminating EOF.
#[allow(clippy::result_large_err)]
pub fn read_columns<S: Socket + ?Sized>(socket: &mut S, count: u64) -> Result<Arc<ColumnInfo>> {
    let mut columns = Vec::with_capacity(usize::try_from(count).unwrap_or(0).min(4096));
    for _ in 0..count {
        let packet = read_packet(socket)?;
        columns.push(parse_column_definition(&packet.payload)?);
    }
    let packet = read_packet(socket)?;
    if !is_eof_packet(&packet.payload) {
        return Err(Error::data_reading(format!(
            "expected EOF after {count} column definitions, got a {} byte packet",
            packet.payload.len()
        )));
    }
    Ok(Arc::new(ColumnInfo::new(columns)))
}

/// Decode one text-protocol row against `columns`.
#[allow(clippy::result_large_err)]
pub fn decode_row(payload: &[u8], columns: &Arc<ColumnInfo>) -> Result<Row> {
    let mut reader = PacketReader::new(payload);
    let values = columns
        .iter()
        .map(|col| -> Result<Value> {
            let cell = reader.read_lenenc_bytes()?;
            Ok(decode_text_value(
                FieldType::from_u8(col.type_code),
                cell,
                col.is_unsigned(),
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::with_columns(Arc::clone(columns), values))
}

/// Read rows up to the EOF, converting each with `convert`.
///
/// When a conversion fails the rest of the result set is drained before the
/// error is returned, so the connection stays usable.
#[allow(clippy::result_large_err)]
pub fn read_rows<S, T, F>(
    socket: &mut S,
    columns: &Arc<ColumnInfo>,
    mut convert: F,
) -> Result<(Vec<T>, EofPacket)>
where
    S: Socket + ?Sized,
    F: FnMut(Row) -> Result<T>,
{
    let mut rows = Vec::new();
    loop {
        let packet = read_packet(socket)?;
        let payload = &packet.payload;
        if is_eof_packet(payload) {
            let eof = PacketReader::new(payload).parse_eof_packet()?;
            return Ok((rows, eof));
        }
        if payload.first() == Some(&0xFF) {
            return Err(Error::Server(PacketReader::new(payload).parse_err_packet()?));
        }
        let row = decode_row(payload, columns)?;
        match convert(row) {
            Ok(value) => rows.push(value),
            Err(e) => {
                let eof = read_until_eof(socket)?;
                if eof.more_results() {
                    drain_results(socket)?;
                }
                return Err(e);
            }
        }
    }
}

/// Read and discard every remaining chained result.
///
/// Call after a response whose status carried MORE_RESULTS_EXISTS.
#[allow(clippy::result_large_err)]
pub fn drain_results<S: Socket + ?Sized>(socket: &mut S) -> Result<()> {
    loop {
        let packet = read_packet(socket)?;
        let more = match interpret_response(&packet.payload)? {
            Response::Ok(ok) => ok.more_results(),
            Response::ResultSet(count) => {
                read_columns(socket, count)?;
                read_until_eof(socket)?.more_results()
            }
        };
        if !more {
            return Ok(());
        }
    }
}
