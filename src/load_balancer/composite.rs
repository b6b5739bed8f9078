//! Composite services: weighted split and traffic mirroring.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};

use crate::http::response;
use crate::load_balancer::ServiceHandle;
use crate::middleware::{buffer_body, content_length, replay_request, BoxFuture, BufferedBody};

/// Picks one child per request at random, in proportion to its weight.
/// Children with no healthy server are left out of the draw.
#[derive(Debug)]
pub struct WeightedServices {
    name: String,
    children: Vec<(Arc<ServiceHandle>, u32)>,
}

impl WeightedServices {
    pub fn new(name: &str, children: Vec<(Arc<ServiceHandle>, u32)>) -> Self {
        Self {
            name: name.to_string(),
            children,
        }
    }

    pub fn is_available(&self) -> bool {
        self.children
            .iter()
            .any(|(child, weight)| *weight > 0 && child.is_available())
    }

    fn pick(&self) -> Option<&Arc<ServiceHandle>> {
        let available: Vec<&(Arc<ServiceHandle>, u32)> = self
            .children
            .iter()
            .filter(|(child, weight)| *weight > 0 && child.is_available())
            .collect();
        let total: u64 = available.iter().map(|(_, w)| *w as u64).sum();
        if total == 0 {
            return None;
        }
        let mut ticket = fastrand::u64(0..total);
        for (child, weight) in available {
            let weight = *weight as u64;
            if ticket < weight {
                return Some(child);
            }
            ticket -= weight;
        }
        None
    }

    pub fn serve(&self, req: Request<Body>) -> BoxFuture<'_, Response<Body>> {
        match self.pick() {
            Some(child) => child.serve(req),
            None => {
                tracing::warn!(service = %self.name, "No available child service");
                Box::pin(async { response::service_unavailable() })
            }
        }
    }
}

/// Serves from the main service and sends copies to mirrors.
///
/// Mirror responses are discarded. Requests whose body exceeds
/// `max_body_size` are served without mirroring.
#[derive(Debug)]
pub struct Mirroring {
    name: String,
    main: Arc<ServiceHandle>,
    mirrors: Vec<(Arc<ServiceHandle>, u32)>,
    max_body_size: u64,
}

impl Mirroring {
    pub fn new(
        name: &str,
        main: Arc<ServiceHandle>,
        mirrors: Vec<(Arc<ServiceHandle>, u32)>,
        max_body_size: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            main,
            mirrors,
            max_body_size,
        }
    }

    pub fn is_available(&self) -> bool {
        self.main.is_available()
    }

    pub fn serve(&self, req: Request<Body>) -> BoxFuture<'_, Response<Body>> {
        let selected: Vec<Arc<ServiceHandle>> = self
            .mirrors
            .iter()
            .filter(|(_, percent)| *percent > 0 && fastrand::u32(0..100) < *percent)
            .map(|(mirror, _)| mirror.clone())
            .collect();

        let too_large = content_length(&req).map_or(false, |len| len > self.max_body_size);
        if selected.is_empty() || too_large {
            return self.main.serve(req);
        }

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let limit = usize::try_from(self.max_body_size).unwrap_or(usize::MAX);
            let body = match buffer_body(body, limit).await {
                Ok(BufferedBody::Complete(body)) => body,
                Ok(BufferedBody::Overflow(body)) => {
                    tracing::debug!(service = %self.name, "Body too large to mirror, serving main only");
                    return self.main.serve(Request::from_parts(parts, body)).await;
                }
                Err(e) => {
                    tracing::debug!(service = %self.name, error = %e, "Cannot read request body");
                    return response::bad_request();
                }
            };

            for mirror in selected {
                let copy = replay_request(&parts, &body);
                let service = self.name.clone();
                tokio::spawn(async move {
                    let response = mirror.serve(copy).await;
                    tracing::trace!(service = %service, status = %response.status(), "Mirror answered");
                });
            }

            self.main.serve(replay_request(&parts, &body)).await
        })
    }
}
