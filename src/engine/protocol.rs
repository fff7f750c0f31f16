//! Line-delimited JSON protocol spoken with the engine process.
//!
//! Every line is one message. Calls from this side carry `method`; the engine answers with
//! `result` or `error` under the same `id`. The engine may also call back (`header` / `footer`)
//! while rendering, which is answered with a `result` line.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::report::models::{PageBand, PaperSize};

use super::EngineError;

pub const METHOD_PING: &str = "ping";
pub const METHOD_CREATE_PAGE: &str = "createPage";
pub const METHOD_SET_PAPER_SIZE: &str = "setPaperSize";
pub const METHOD_SET_VIEWPORT: &str = "setViewport";
pub const METHOD_SET_CONTENT: &str = "setContent";
pub const METHOD_RENDER: &str = "render";
pub const METHOD_CLOSE_PAGE: &str = "closePage";

pub const CALLBACK_HEADER: &str = "header";
pub const CALLBACK_FOOTER: &str = "footer";

#[derive(Debug, Serialize)]
pub struct EngineCall<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct CallbackReply {
    pub id: u64,
    pub result: String,
}

/// Any line read from the engine.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parameters of a per-page band callback.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandCallback {
    pub page_id: String,
    pub page_num: u32,
    pub num_pages: u32,
}

#[derive(Debug)]
pub enum Inbound {
    Response {
        id: u64,
        outcome: Result<Value, String>,
    },
    Callback {
        id: u64,
        method: String,
        params: BandCallback,
    },
}

impl InboundMessage {
    pub fn parse(line: &str) -> Result<Inbound, EngineError> {
        let message: InboundMessage =
            serde_json::from_str(line).map_err(|e| EngineError::Protocol(e.to_string()))?;
        let id = message
            .id
            .ok_or_else(|| EngineError::Protocol(format!("message without id: {line}")))?;

        if let Some(method) = message.method {
            let params = message.params.unwrap_or(Value::Null);
            let params: BandCallback = serde_json::from_value(params)
                .map_err(|e| EngineError::Protocol(format!("bad '{method}' callback: {e}")))?;
            return Ok(Inbound::Callback { id, method, params });
        }

        let outcome = match message.error {
            Some(error) => Err(error),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        Ok(Inbound::Response { id, outcome })
    }
}

fn band_params(band: &Option<PageBand>) -> Value {
    match band {
        Some(band) => json!({ "height": band.height }),
        None => Value::Null,
    }
}

/// `setPaperSize` parameters; band contents stay on this side and are fetched by callback.
pub fn paper_size_params(page_id: &str, paper: &PaperSize) -> Value {
    json!({
        "pageId": page_id,
        "format": paper.format.as_str(),
        "orientation": paper.orientation.as_str(),
        "margin": paper.margin,
        "header": band_params(&paper.header),
        "footer": band_params(&paper.footer),
    })
}
