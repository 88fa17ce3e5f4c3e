use super::{FastCgiError, Result};
use faas_common::HttpResponse;
use indexmap::IndexMap;

/// Response parsed from the worker's STDOUT stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastCgiResponse {
    pub status_code: u16,
    /// Lower-cased header name to every value the script sent, in order.
    pub headers: IndexMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl FastCgiResponse {
    /// Parse CGI output: a header block terminated by a blank line, then the
    /// body. The `Status` header sets the status code and defaults to 200.
    pub fn parse(output: &[u8]) -> Result<Self> {
        let (header_block, body) = split_header_block(output).ok_or_else(|| {
            FastCgiError::Protocol("response is missing the end of its header block".into())
        })?;
        let header_block = std::str::from_utf8(header_block)
            .map_err(|e| FastCgiError::Protocol(format!("response headers are not UTF-8: {e}")))?;

        let mut status_code = 200;
        let mut headers: IndexMap<String, Vec<String>> = IndexMap::new();

        for line in header_block.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let (name, value) = line.split_once(':').ok_or_else(|| {
                FastCgiError::Protocol(format!("malformed response header line {line:?}"))
            })?;
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();

            if name == "status" {
                status_code = value
                    .split_whitespace()
                    .next()
                    .and_then(|code| code.parse().ok())
                    .ok_or_else(|| {
                        FastCgiError::Protocol(format!("invalid status header {value:?}"))
                    })?;
                continue;
            }

            headers.entry(name).or_default().push(value.to_string());
        }

        Ok(Self {
            status_code,
            headers,
            body: body.to_vec(),
        })
    }

    /// Serialize back to CGI output.
    pub fn to_cgi_output(&self) -> Vec<u8> {
        let mut output = format!("Status: {}\r\n", self.status_code);
        for (name, values) in &self.headers {
            for value in values {
                output.push_str(name);
                output.push_str(": ");
                output.push_str(value);
                output.push_str("\r\n");
            }
        }
        output.push_str("\r\n");

        let mut output = output.into_bytes();
        output.extend_from_slice(&self.body);
        output
    }
}

impl From<FastCgiResponse> for HttpResponse {
    fn from(response: FastCgiResponse) -> Self {
        HttpResponse::new(response.status_code, response.headers, response.body)
    }
}

/// Split at the first blank line, accepting both CRLF and bare LF endings.
fn split_header_block(output: &[u8]) -> Option<(&[u8], &[u8])> {
    let crlf = find(output, b"\r\n\r\n").map(|pos| (pos, 4));
    let lf = find(output, b"\n\n").map(|pos| (pos, 2));

    let (pos, len) = match (crlf, lf) {
        (Some(crlf), Some(lf)) => {
            if lf.0 < crlf.0 {
                lf
            } else {
                crlf
            }
        }
        (Some(found), None) | (None, Some(found)) => found,
        (None, None) => return None,
    };

    Some((&output[..pos], &output[pos + len..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
