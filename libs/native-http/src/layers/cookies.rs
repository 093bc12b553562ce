use crate::cookies::CookieJar;
use http::header::COOKIE;
use http::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use url::Url;

/// Tower layer wiring a [`CookieJar`] into the connection path
///
/// Sits below the redirect layer so every hop reads and writes the jar.
#[derive(Clone)]
pub struct CookieLayer {
    jar: Arc<CookieJar>,
}

impl CookieLayer {
    #[must_use]
    pub fn new(jar: Arc<CookieJar>) -> Self {
        Self { jar }
    }
}

impl<S> Layer<S> for CookieLayer {
    type Service = CookieService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieService {
            inner,
            jar: Arc::clone(&self.jar),
        }
    }
}

/// Service that attaches jar cookies and stores `Set-Cookie` responses
///
/// A `Cookie` header set by the caller is sent unchanged.
#[derive(Clone)]
pub struct CookieService<S> {
    inner: S,
    jar: Arc<CookieJar>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CookieService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let url = Url::parse(&req.uri().to_string()).ok();

        if let Some(url) = &url
            && !req.headers().contains_key(COOKIE)
            && let Some(header) = self.jar.request_header(url)
        {
            req.headers_mut().insert(COOKIE, header);
        }

        let jar = Arc::clone(&self.jar);
        let future = self.inner.call(req);
        Box::pin(async move {
            let response = future.await?;
            if let Some(url) = &url {
                jar.store_response_cookies(url, response.headers());
            }
            Ok(response)
        })
    }
}
