use crate::events::ArtifactIndex;
use anyhow::Result;
use futures::future;
use http::{header, Request, Response};
use serde::Serialize;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace};

type Body = http_body_util::Full<bytes::Bytes>;

/// Serves a read-only JSON view of the deployed artifacts.
#[derive(Clone, Debug)]
pub struct Mirror {
    index: ArtifactIndex,
}

#[derive(Serialize)]
struct List<'a, T> {
    list: &'a [T],
}

// === impl Mirror ===

impl Mirror {
    pub fn new(index: ArtifactIndex) -> Self {
        Self { index }
    }

    fn handle<B>(&self, req: &Request<B>) -> Response<Body> {
        let list = match req.uri().path() {
            "/applications" => to_json(&self.index.applications()),
            "/subscriptions" => to_json(&self.index.subscriptions()),
            "/applicationmappings" => to_json(&self.index.application_mappings()),
            "/applicationkeymappings" => to_json(&self.index.key_mappings()),
            _ => return status(http::StatusCode::NOT_FOUND),
        };

        if req.method() != http::Method::GET {
            let mut rsp = status(http::StatusCode::METHOD_NOT_ALLOWED);
            rsp.headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET"));
            return rsp;
        }

        match list {
            Ok(json) => {
                let mut rsp = Response::new(Body::from(json));
                rsp.headers_mut().insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("application/json"),
                );
                rsp
            }
            Err(error) => {
                error!(%error, path = %req.uri().path(), "Failed to encode artifacts");
                status(http::StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl<B> tower::Service<Request<B>> for Mirror {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::Ready<Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), path = %req.uri().path(), "Mirror request");
        future::ok(self.handle(&req))
    }
}

fn to_json<T: Serialize>(list: &[T]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&List { list })
}

fn status(code: http::StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = code;
    rsp
}

/// Serves the mirror over plaintext HTTP/1 until the process shuts down.
pub async fn serve(listener: TcpListener, mirror: Mirror, drain: drain::Watch) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Artifact mirror listening");

    tokio::pin! {
        let shutdown = drain.signaled();
    }
    loop {
        let (socket, client) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(error) => {
                    debug!(%error, "Failed to accept connection");
                    continue;
                }
            },
            _ = (&mut shutdown) => break,
        };

        let svc = hyper_util::service::TowerToHyperService::new(mirror.clone());
        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(socket);
            if let Err(error) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, svc)
                .await
            {
                debug!(%error, %client, "Connection closed with an error");
            }
        });
    }

    debug!("Artifact mirror shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::{Application, ApplicationKeyMapping, ArtifactDeployer};
    use http_body_util::BodyExt;

    async fn body(rsp: Response<Body>) -> serde_json::Value {
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn lists_artifacts_sorted() {
        let index = ArtifactIndex::default();
        for uuid in ["b", "a"] {
            index
                .deploy_application(Application {
                    uuid: uuid.to_string(),
                    organization: "acme".to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        index
            .deploy_key_mapping(ApplicationKeyMapping {
                application_uuid: "a".to_string(),
                env_id: "default".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mirror = Mirror::new(index);

        let rsp = mirror.handle(&get("/applications"));
        assert_eq!(rsp.status(), http::StatusCode::OK);
        assert_eq!(
            rsp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let json = body(rsp).await;
        assert_eq!(json["list"][0]["uuid"], "a");
        assert_eq!(json["list"][1]["uuid"], "b");

        let json = body(mirror.handle(&get("/applicationkeymappings"))).await;
        assert_eq!(json["list"][0]["applicationUUID"], "a");
        assert_eq!(json["list"][0]["envID"], "default");

        let json = body(mirror.handle(&get("/subscriptions"))).await;
        assert_eq!(json, serde_json::json!({ "list": [] }));
    }

    #[tokio::test]
    async fn rejects_unknown_paths_and_methods() {
        let mirror = Mirror::new(ArtifactIndex::default());

        let rsp = mirror.handle(&get("/apis"));
        assert_eq!(rsp.status(), http::StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(http::Method::POST)
            .uri("/applicationmappings")
            .body(())
            .unwrap();
        let rsp = mirror.handle(&req);
        assert_eq!(rsp.status(), http::StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(rsp.headers().get(header::ALLOW).unwrap(), "GET");
    }
}
