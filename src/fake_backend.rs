//! Local HTTP server standing in for Google APIs in tests.

use std::sync::{Arc, Mutex};

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};

#[derive(Debug, Clone)]
pub struct Captured {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub metadata_flavor: Option<String>,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

type Reply = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

pub struct FakeBackend {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl FakeBackend {
    /// Binds an ephemeral port; every request is recorded and answered by
    /// `reply`.
    pub fn start<F>(reply: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let reply: Reply = Arc::new(reply);

        let log = requests.clone();
        let server = HttpServer::new(move || {
            let log = log.clone();
            let reply = reply.clone();
            App::new().default_service(web::to(move |req: HttpRequest, body: web::Bytes| {
                let log = log.clone();
                let reply = reply.clone();
                async move {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned)
                    };
                    log.lock().unwrap().push(Captured {
                        method: req.method().to_string(),
                        path: req.path().to_owned(),
                        authorization: header("authorization"),
                        metadata_flavor: header("metadata-flavor"),
                        body: body.to_vec(),
                    });
                    reply(&req)
                }
            }))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        actix_rt::spawn(server.run());

        FakeBackend {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}
