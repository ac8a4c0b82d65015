//! Ordered composition of interceptors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::SharedConnection;
use crate::error::{aggregate, InterceptorError};
use crate::interceptor::Interceptor;
use crate::pipeline::{SharedReader, SharedWriter};

/// An ordered list of interceptors acting as one.
///
/// Writer composition is the left fold of the member list: the writer
/// returned by [`Chain::intercept_writer`] triggers the last registered
/// member first and the base writer last, so the first registered member sits
/// closest to the transport. Reader composition is symmetric, which means the
/// first registered member also sees inbound messages first — an encryption
/// member registered first therefore decrypts before anyone else looks at the
/// envelope.
pub struct Chain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Chain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }
}

#[async_trait]
impl Interceptor for Chain {
    /// Bind every member, in registration order, handing each the fully
    /// composed stack built from the given base writer and reader. Every
    /// member gets symmetric access to the complete outer interface.
    async fn bind(
        &self,
        conn: SharedConnection,
        writer: SharedWriter,
        reader: SharedReader,
    ) -> Result<(), InterceptorError> {
        let writer = self.intercept_writer(writer);
        let reader = self.intercept_reader(reader);

        for interceptor in &self.interceptors {
            interceptor
                .bind(conn.clone(), writer.clone(), reader.clone())
                .await?;
        }

        Ok(())
    }

    fn intercept_writer(&self, writer: SharedWriter) -> SharedWriter {
        self.interceptors
            .iter()
            .fold(writer, |writer, interceptor| {
                interceptor.intercept_writer(writer)
            })
    }

    fn intercept_reader(&self, reader: SharedReader) -> SharedReader {
        self.interceptors
            .iter()
            .fold(reader, |reader, interceptor| {
                interceptor.intercept_reader(reader)
            })
    }

    async fn unbind(&self, conn: &SharedConnection) {
        for interceptor in &self.interceptors {
            interceptor.unbind(conn).await;
        }
    }

    /// Close every member. Errors are collected; one failing member does not
    /// prevent the rest from closing.
    async fn close(&self) -> Result<(), InterceptorError> {
        let mut errs = Vec::new();
        for interceptor in &self.interceptors {
            if let Err(err) = interceptor.close().await {
                errs.push(err);
            }
        }
        aggregate(errs)
    }
}
