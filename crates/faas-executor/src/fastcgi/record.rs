//! FastCGI record framing (protocol version 1).

use super::{FastCgiError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const VERSION_1: u8 = 1;
pub const HEADER_LEN: usize = 8;
pub const MAX_CONTENT_LENGTH: usize = 65535;

/// Role for BEGIN_REQUEST
pub const RESPONDER: u16 = 1;

/// protocolStatus values of END_REQUEST
pub const REQUEST_COMPLETE: u8 = 0;
pub const CANT_MPX_CONN: u8 = 1;
pub const OVERLOADED: u8 = 2;
pub const UNKNOWN_ROLE: u8 = 3;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl TryFrom<u8> for RecordType {
    type Error = FastCgiError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            11 => RecordType::UnknownType,
            other => {
                return Err(FastCgiError::Protocol(format!(
                    "unknown record type {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    /// Header for `content_length` bytes of content, padded to 8 bytes.
    pub fn new(record_type: RecordType, request_id: u16, content_length: u16) -> Self {
        Self {
            record_type,
            request_id,
            content_length,
            padding_length: ((8 - content_length % 8) % 8) as u8,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let request_id = self.request_id.to_be_bytes();
        let content_length = self.content_length.to_be_bytes();
        [
            VERSION_1,
            self.record_type as u8,
            request_id[0],
            request_id[1],
            content_length[0],
            content_length[1],
            self.padding_length,
            0,
        ]
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        if bytes[0] != VERSION_1 {
            return Err(FastCgiError::Protocol(format!(
                "unsupported protocol version {}",
                bytes[0]
            )));
        }

        Ok(Self {
            record_type: RecordType::try_from(bytes[1])?,
            request_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            content_length: u16::from_be_bytes([bytes[4], bytes[5]]),
            padding_length: bytes[6],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub content: Vec<u8>,
}

/// Append a single record. `content` must fit in one record.
pub fn write_record(buf: &mut Vec<u8>, record_type: RecordType, request_id: u16, content: &[u8]) {
    debug_assert!(content.len() <= MAX_CONTENT_LENGTH);
    let header = RecordHeader::new(record_type, request_id, content.len() as u16);
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(content);
    buf.resize(buf.len() + header.padding_length as usize, 0);
}

/// Append a whole stream: as many records as needed, then the empty record
/// that closes the stream.
pub fn write_stream(buf: &mut Vec<u8>, record_type: RecordType, request_id: u16, content: &[u8]) {
    for chunk in content.chunks(MAX_CONTENT_LENGTH) {
        write_record(buf, record_type, request_id, chunk);
    }
    write_record(buf, record_type, request_id, &[]);
}

pub fn begin_request_body(role: u16, keep_conn: bool) -> [u8; 8] {
    let role = role.to_be_bytes();
    [role[0], role[1], keep_conn as u8, 0, 0, 0, 0, 0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequestBody {
    pub fn encode(&self) -> [u8; 8] {
        let app_status = self.app_status.to_be_bytes();
        [
            app_status[0],
            app_status[1],
            app_status[2],
            app_status[3],
            self.protocol_status,
            0,
            0,
            0,
        ]
    }

    pub fn decode(content: &[u8]) -> Result<Self> {
        if content.len() < 8 {
            return Err(FastCgiError::Protocol(format!(
                "END_REQUEST body is {} bytes, expected 8",
                content.len()
            )));
        }

        Ok(Self {
            app_status: u32::from_be_bytes([content[0], content[1], content[2], content[3]]),
            protocol_status: content[4],
        })
    }
}

fn encode_length(buf: &mut Vec<u8>, length: usize) {
    if length < 128 {
        buf.push(length as u8);
    } else {
        buf.extend_from_slice(&(length as u32 | 0x8000_0000).to_be_bytes());
    }
}

/// Encode name-value pairs for a PARAMS stream.
pub fn encode_params<'a, I>(params: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut buf = Vec::new();
    for (name, value) in params {
        encode_length(&mut buf, name.len());
        encode_length(&mut buf, value.len());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
    buf
}

fn decode_length(bytes: &[u8], pos: &mut usize) -> Result<usize> {
    let first = *bytes
        .get(*pos)
        .ok_or_else(|| FastCgiError::Protocol("truncated name-value length".into()))?;

    if first & 0x80 == 0 {
        *pos += 1;
        return Ok(first as usize);
    }

    let raw = bytes
        .get(*pos..*pos + 4)
        .ok_or_else(|| FastCgiError::Protocol("truncated name-value length".into()))?;
    *pos += 4;
    Ok((u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) & 0x7fff_ffff) as usize)
}

/// Decode the concatenated content of a PARAMS stream.
pub fn decode_params(bytes: &[u8]) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let name_len = decode_length(bytes, &mut pos)?;
        let value_len = decode_length(bytes, &mut pos)?;
        let end = pos + name_len + value_len;
        if end > bytes.len() {
            return Err(FastCgiError::Protocol("truncated name-value pair".into()));
        }

        let name = String::from_utf8_lossy(&bytes[pos..pos + name_len]).into_owned();
        let value = String::from_utf8_lossy(&bytes[pos + name_len..end]).into_owned();
        params.push((name, value));
        pos = end;
    }

    Ok(params)
}

/// Read the next record, including its padding.
pub async fn read_record<R>(reader: &mut R) -> Result<Record>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact(reader, &mut header).await?;
    let header = RecordHeader::decode(&header)?;

    let mut content = vec![0u8; header.content_length as usize + header.padding_length as usize];
    read_exact(reader, &mut content).await?;
    content.truncate(header.content_length as usize);

    Ok(Record { header, content })
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FastCgiError::UnexpectedEof),
        Err(e) => Err(FastCgiError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encoding_pads_to_eight_bytes() {
        let header = RecordHeader::new(RecordType::Params, 1, 13);
        assert_eq!(header.padding_length, 3);
        assert_eq!(header.encode(), [1, 4, 0, 1, 0, 13, 3, 0]);
        assert_eq!(RecordHeader::decode(&header.encode()).unwrap(), header);

        assert_eq!(RecordHeader::new(RecordType::Stdin, 1, 16).padding_length, 0);
    }

    #[test]
    fn test_header_rejects_unknown_version_and_type() {
        assert!(matches!(
            RecordHeader::decode(&[2, 6, 0, 1, 0, 0, 0, 0]),
            Err(FastCgiError::Protocol(_))
        ));
        assert!(matches!(
            RecordHeader::decode(&[1, 42, 0, 1, 0, 0, 0, 0]),
            Err(FastCgiError::Protocol(_))
        ));
    }

    #[test]
    fn test_params_use_long_lengths_above_127_bytes() {
        let long_value = "x".repeat(300);
        let encoded = encode_params([("SHORT", "1"), ("LONG", long_value.as_str())]);

        assert_eq!(&encoded[..2], &[5, 1]);
        // 4-byte length for the 300 byte value
        assert_eq!(&encoded[8..13], &[4, 0x80, 0, 1, 44]);

        let decoded = decode_params(&encoded).unwrap();
        assert_eq!(decoded[0], ("SHORT".to_string(), "1".to_string()));
        assert_eq!(decoded[1].1.len(), 300);
    }

    #[test]
    fn test_stream_is_chunked_and_terminated() {
        let content = vec![7u8; MAX_CONTENT_LENGTH + 10];
        let mut buf = Vec::new();
        write_stream(&mut buf, RecordType::Stdin, 1, &content);

        // full record, 10 byte record padded to 16, empty terminator
        assert_eq!(
            buf.len(),
            (HEADER_LEN + MAX_CONTENT_LENGTH + 1) + (HEADER_LEN + 16) + HEADER_LEN
        );
        assert_eq!(&buf[buf.len() - HEADER_LEN..], &[1, 5, 0, 1, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_record_strips_padding() {
        let mut buf = Vec::new();
        write_record(&mut buf, RecordType::Stdout, 1, b"hello");
        write_record(&mut buf, RecordType::Stdout, 1, b"");

        let mut reader = buf.as_slice();
        let record = read_record(&mut reader).await.unwrap();
        assert_eq!(record.header.record_type, RecordType::Stdout);
        assert_eq!(record.content, b"hello");

        let terminator = read_record(&mut reader).await.unwrap();
        assert!(terminator.content.is_empty());

        assert!(matches!(
            read_record(&mut reader).await,
            Err(FastCgiError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_end_request_body() {
        let body = EndRequestBody {
            app_status: 255,
            protocol_status: OVERLOADED,
        };
        assert_eq!(EndRequestBody::decode(&body.encode()).unwrap(), body);
        assert!(EndRequestBody::decode(&[0, 0]).is_err());
    }
}
