pub mod api;

use crate::cli::Args;
use crate::stream::SessionHandler;
use std::error::Error;

pub struct Server {
    addr: String,
    handler: SessionHandler,
    args: Args,
}

impl Server {
    pub fn new(
        addr: String,
        handler: SessionHandler,
        args: Args,
    ) -> Self {
        Self {
            addr,
            handler,
            args,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let tls = if self.args.enable_tls {
            match (&self.args.tls_cert_path, &self.args.tls_key_path) {
                (Some(cert), Some(key)) => Some(api::TlsPaths {
                    cert_path: cert.clone(),
                    key_path: key.clone(),
                }),
                _ => return Err("ENABLE_TLS requires both TLS_CERT_PATH and TLS_KEY_PATH".into()),
            }
        } else {
            None
        };

        api::start_http_server(&self.addr, self.handler.clone(), tls).await
    }
}
