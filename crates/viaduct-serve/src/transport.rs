//! Backend transport contract and the reply-decoding helper transporters
//! share.

use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use viaduct_errors::prelude::*;

use crate::config::Configuration;
use crate::context::Context;

/// Performs the backend RPC for one protocol and fills the context's
/// response buffer. Failures come back as `ServeError`; the dispatcher's
/// terminal wrapper also stamps the error status onto the response.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Called once before serving begins, with the transporter's
    /// configuration namespace.
    fn init(&self, _config: &Configuration) -> anyhow::Result<()> {
        Ok(())
    }

    async fn transport(&self, ctx: &Context) -> Result<(), ServeError>;
}

/// A decoded backend reply ready to be written into the response buffer.
pub struct DecodedReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Translates a raw protocol reply into status/headers/body. Keyed by
/// `rpc_proto` in the extension registry.
pub type TransportDecoder =
    Arc<dyn Fn(&Context, serde_json::Value) -> Result<DecodedReply, ServeError> + Send + Sync>;

/// Pass the raw reply through the protocol decoder and write the result
/// into the response buffer. A missing decoder or a decode failure is an
/// internal gateway error.
pub fn write_decoded_reply(
    ctx: &Context,
    decoder: Option<&TransportDecoder>,
    raw: serde_json::Value,
) -> Result<(), ServeError> {
    let decoder = decoder.ok_or_else(|| {
        ServeErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR, codes::GATEWAY_INTERNAL)
            .message("TRANSPORT:DECODER_NOT_FOUND")
            .build()
    })?;
    let reply = decoder(ctx, raw).map_err(|err| {
        if err.error_code() == codes::GATEWAY_INTERNAL {
            err
        } else {
            ServeErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR, codes::GATEWAY_INTERNAL)
                .message("TRANSPORT:DECODE_RESPONSE")
                .shared_cause(Arc::new(err))
                .build()
        }
    })?;
    ctx.with_response(|response| {
        response.set_status(reply.status);
        response.merge_headers(reply.headers);
        response.set_body(reply.body);
    });
    Ok(())
}

/// Decoder for transports whose reply already is the response body.
pub fn passthrough_decoder() -> TransportDecoder {
    Arc::new(|_ctx, raw| {
        Ok(DecodedReply {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: raw,
        })
    })
}
