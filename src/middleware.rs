use std::{rc::Rc, time::Instant};

use actix_service::{self, Transform};
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures::{
    future::{ready, LocalBoxFuture, Ready},
    FutureExt,
};
use tracing::info;

use crate::record_id;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifier of the request being served, readable from request extensions.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

pub struct RequestLoggingMiddleware<S> {
    service: Rc<S>,
}

/// Tags every request with a sortable id, echoes it in `X-Request-Id`, and
/// logs the outcome.
pub struct RequestLogging;

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv: Rc<S> = self.service.clone();

        async move {
            let started = Instant::now();
            let request_id = record_id::generate();
            let method = req.method().to_string();
            let path = req.path().to_string();
            req.extensions_mut().insert(RequestId(request_id.clone()));

            let mut res: ServiceResponse<B> = srv.call(req).await?;

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                res.headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = res.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request served"
            );
            Ok(res)
        }
        .boxed_local()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggingMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware {
            service: Rc::new(service),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpRequest, HttpResponse};

    async fn echo_id(req: HttpRequest) -> HttpResponse {
        let id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        HttpResponse::Ok().body(id)
    }

    #[actix_web::test]
    async fn request_id_is_exposed_to_handlers_and_clients() {
        let app = test::init_service(
            App::new()
                .wrap(RequestLogging)
                .route("/", web::get().to(echo_id)),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        let header = res
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = test::read_body(res).await;

        assert_eq!(header.len(), record_id::TIMESTAMP_LEN + record_id::SUFFIX_LEN);
        assert_eq!(body, header.as_bytes());
    }
}
