// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: an in-memory Kubernetes API server behind a `kube::Client`.
//!
//! Supports get, list (with equality label selectors), create, replace,
//! merge patch, delete and the `status` subresource. Objects carrying
//! finalizers are only marked for deletion, and are dropped once an update
//! empties their finalizer list. Every successful write is recorded so tests
//! can assert that a reconcile pass was a no-op.

use http::{Method, Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::chrono::{SecondsFormat, Utc};
use kube::client::Body;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::Service;

/// (apiVersion, plural, namespace, name)
type ObjectKey = (String, String, String, String);

/// Edit applied to a stored object ahead of a matching request
struct Interleave {
    method: String,
    path_fragment: String,
    key: ObjectKey,
    edit: Box<dyn FnOnce(&mut Value) + Send>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    writes: Vec<String>,
    failures: Vec<(String, String, u16, String)>,
    interleaved: Vec<Interleave>,
    resource_version: u64,
    uid: u64,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uid += 1;
        format!("uid-{}", self.uid)
    }
}

/// The parts of a request path the fake server routes on
#[derive(Debug)]
struct Target {
    api_version: String,
    plural: String,
    namespace: Option<String>,
    name: Option<String>,
    status: bool,
}

fn parse_path(path: &str) -> Option<Target> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let (api_version, rest) = match segments.first()? {
        &"api" => (segments.get(1)?.to_string(), &segments[2..]),
        &"apis" => (
            format!("{}/{}", segments.get(1)?, segments.get(2)?),
            &segments[3..],
        ),
        _ => return None,
    };

    let (namespace, rest) = match rest {
        ["namespaces", ns, rest @ ..] if !rest.is_empty() => (Some(ns.to_string()), rest),
        _ => (None, rest),
    };

    match rest {
        [plural] => Some(Target {
            api_version,
            plural: plural.to_string(),
            namespace,
            name: None,
            status: false,
        }),
        [plural, name] => Some(Target {
            api_version,
            plural: plural.to_string(),
            namespace,
            name: Some(name.to_string()),
            status: false,
        }),
        [plural, name, "status"] => Some(Target {
            api_version,
            plural: plural.to_string(),
            namespace,
            name: Some(name.to_string()),
            status: true,
        }),
        _ => None,
    }
}

fn parse_label_selector(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k == "labelSelector")
        .flat_map(|(_, v)| {
            v.split(',')
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn status_body(code: u16, reason: &str, message: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn has_finalizers(obj: &Value) -> bool {
    obj["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

/// A stateful mock of the Kubernetes API server.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<State>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a kube Client talking to this server
    pub fn client(&self) -> Client {
        Client::new(self.clone(), "default")
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Store an object directly, bypassing write accounting
    pub fn insert<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut value = serde_json::to_value(obj).unwrap();
        let mut state = self.lock();
        let namespace = value["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default")
            .to_string();
        let name = value["metadata"]["name"].as_str().unwrap().to_string();
        value["apiVersion"] = json!(K::api_version(&()));
        value["kind"] = json!(K::kind(&()));
        value["metadata"]["namespace"] = json!(namespace);
        value["metadata"]["resourceVersion"] = json!(state.next_resource_version());
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = json!(state.next_uid());
        }
        state.objects.insert(
            (
                K::api_version(&()).to_string(),
                K::plural(&()).to_string(),
                namespace,
                name,
            ),
            value,
        );
    }

    /// Remove an object directly, bypassing finalizers and write accounting
    pub fn remove<K>(&self, namespace: &str, name: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        self.lock().objects.remove(&(
            K::api_version(&()).to_string(),
            K::plural(&()).to_string(),
            namespace.to_string(),
            name.to_string(),
        ));
    }

    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.lock()
            .objects
            .get(&(
                K::api_version(&()).to_string(),
                K::plural(&()).to_string(),
                namespace.to_string(),
                name.to_string(),
            ))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn list<K>(&self, namespace: &str) -> Vec<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let api_version = K::api_version(&()).to_string();
        let plural = K::plural(&()).to_string();
        self.lock()
            .objects
            .iter()
            .filter(|((av, p, ns, _), _)| *av == api_version && *p == plural && ns == namespace)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    /// Answer every request whose method matches and whose path contains
    /// `path_fragment` with an error status
    pub fn fail_on(&self, method: &str, path_fragment: &str, code: u16, reason: &str) {
        self.lock().failures.push((
            method.to_string(),
            path_fragment.to_string(),
            code,
            reason.to_string(),
        ));
    }

    /// Edit the stored object `namespace/name` just before the next request
    /// matching `method` and `path_fragment` is served, the way a concurrent
    /// writer would. The edit is not recorded as a write.
    pub fn interleave<K, F>(&self, method: &str, path_fragment: &str, namespace: &str, name: &str, edit: F)
    where
        K: Resource<DynamicType = ()>,
        F: FnOnce(&mut Value) + Send + 'static,
    {
        self.lock().interleaved.push(Interleave {
            method: method.to_string(),
            path_fragment: path_fragment.to_string(),
            key: (
                K::api_version(&()).to_string(),
                K::plural(&()).to_string(),
                namespace.to_string(),
                name.to_string(),
            ),
            edit: Box::new(edit),
        });
    }

    /// Successful writes as `METHOD path` lines, oldest first
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn reset_writes(&self) {
        self.lock().writes.clear();
    }

    fn handle(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        content_type: &str,
        body: &[u8],
    ) -> (u16, Value) {
        let mut state = self.lock();

        if let Some((_, _, code, reason)) = state
            .failures
            .iter()
            .find(|(m, p, _, _)| m == method.as_str() && path.contains(p.as_str()))
        {
            let (code, reason) = (*code, reason.clone());
            return (code, status_body(code, &reason, "injected failure"));
        }

        if let Some(pos) = state
            .interleaved
            .iter()
            .position(|i| i.method == method.as_str() && path.contains(i.path_fragment.as_str()))
        {
            let interleave = state.interleaved.remove(pos);
            let rv = state.next_resource_version();
            if let Some(obj) = state.objects.get_mut(&interleave.key) {
                (interleave.edit)(obj);
                obj["metadata"]["resourceVersion"] = json!(rv);
            }
        }

        let Some(target) = parse_path(path) else {
            return (404, status_body(404, "NotFound", "unknown path"));
        };
        let namespace = target.namespace.clone().unwrap_or_default();
        let key = |name: &str| {
            (
                target.api_version.clone(),
                target.plural.clone(),
                namespace.clone(),
                name.to_string(),
            )
        };

        let result = match (method.as_str(), target.name.as_deref()) {
            ("GET", Some(name)) => match state.objects.get(&key(name)) {
                Some(obj) => (200, obj.clone()),
                None => (404, status_body(404, "NotFound", &format!("{} \"{}\" not found", target.plural, name))),
            },
            ("GET", None) => {
                let selector = parse_label_selector(query);
                let items: Vec<Value> = state
                    .objects
                    .iter()
                    .filter(|((av, p, ns, _), _)| {
                        *av == target.api_version
                            && *p == target.plural
                            && (target.namespace.is_none() || *ns == namespace)
                    })
                    .filter(|(_, obj)| {
                        selector
                            .iter()
                            .all(|(k, v)| obj["metadata"]["labels"][k].as_str() == Some(v.as_str()))
                    })
                    .map(|(_, obj)| obj.clone())
                    .collect();
                let rv = state.resource_version.to_string();
                (
                    200,
                    json!({
                        "apiVersion": target.api_version,
                        "kind": "List",
                        "metadata": {"resourceVersion": rv},
                        "items": items
                    }),
                )
            }
            ("POST", None) => {
                let Ok(mut obj) = serde_json::from_slice::<Value>(body) else {
                    return (400, status_body(400, "BadRequest", "invalid body"));
                };
                let Some(name) = obj["metadata"]["name"].as_str().map(str::to_string) else {
                    return (422, status_body(422, "Invalid", "name is required"));
                };
                if state.objects.contains_key(&key(&name)) {
                    return (
                        409,
                        status_body(409, "AlreadyExists", &format!("{} \"{}\" already exists", target.plural, name)),
                    );
                }
                obj["metadata"]["namespace"] = json!(namespace);
                obj["metadata"]["resourceVersion"] = json!(state.next_resource_version());
                obj["metadata"]["uid"] = json!(state.next_uid());
                obj["metadata"]["creationTimestamp"] = json!(now());
                state.objects.insert(key(&name), obj.clone());
                (201, obj)
            }
            ("PUT", Some(name)) | ("PATCH", Some(name)) => {
                let Some(stored) = state.objects.get(&key(name)).cloned() else {
                    return (404, status_body(404, "NotFound", &format!("{} \"{}\" not found", target.plural, name)));
                };
                let Ok(incoming) = serde_json::from_slice::<Value>(body) else {
                    return (400, status_body(400, "BadRequest", "invalid body"));
                };

                if let Some(rv) = incoming["metadata"]["resourceVersion"].as_str() {
                    if Some(rv) != stored["metadata"]["resourceVersion"].as_str() {
                        return (409, status_body(409, "Conflict", "the object has been modified"));
                    }
                }

                let proposed = if *method == Method::PUT {
                    incoming
                } else if content_type.starts_with("application/merge-patch+json")
                    || content_type.starts_with("application/strategic-merge-patch+json")
                {
                    let mut doc = stored.clone();
                    json_patch::merge(&mut doc, &incoming);
                    doc
                } else {
                    return (415, status_body(415, "UnsupportedMediaType", content_type));
                };

                let mut updated = if target.status {
                    let mut obj = stored.clone();
                    obj["status"] = proposed["status"].clone();
                    obj
                } else {
                    let mut obj = proposed;
                    // status is only writable through the subresource
                    match stored.get("status") {
                        Some(status) => obj["status"] = status.clone(),
                        None => {
                            if let Some(map) = obj.as_object_mut() {
                                map.remove("status");
                            }
                        }
                    }
                    // server-owned metadata survives updates
                    for field in ["uid", "creationTimestamp", "deletionTimestamp", "namespace"] {
                        obj["metadata"][field] = stored["metadata"][field].clone();
                    }
                    obj
                };
                updated["metadata"]["resourceVersion"] = json!(state.next_resource_version());

                if !updated["metadata"]["deletionTimestamp"].is_null() && !has_finalizers(&updated) {
                    state.objects.remove(&key(name));
                } else {
                    state.objects.insert(key(name), updated.clone());
                }
                (200, updated)
            }
            ("DELETE", Some(name)) => {
                let Some(mut stored) = state.objects.get(&key(name)).cloned() else {
                    return (404, status_body(404, "NotFound", &format!("{} \"{}\" not found", target.plural, name)));
                };
                if has_finalizers(&stored) {
                    if stored["metadata"]["deletionTimestamp"].is_null() {
                        stored["metadata"]["deletionTimestamp"] = json!(now());
                        stored["metadata"]["resourceVersion"] = json!(state.next_resource_version());
                        state.objects.insert(key(name), stored.clone());
                    }
                } else {
                    state.objects.remove(&key(name));
                }
                (200, stored)
            }
            _ => (405, status_body(405, "MethodNotAllowed", method.as_str())),
        };

        if *method != Method::GET && (200..300).contains(&result.0) {
            state.writes.push(format!("{} {}", method, path));
        }
        result
    }
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|e| tower::BoxError::from(e.to_string()))?
                .to_bytes();
            let content_type = parts
                .headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let (status, value) = server.handle(
                &parts.method,
                parts.uri.path(),
                parts.uri.query(),
                &content_type,
                &bytes,
            );

            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value)?))
                .unwrap())
        })
    }
}

/// Builders for the objects tests seed the fake server with
pub mod fixtures {
    use crate::constants::labels;
    use crate::reconcilers::dataset::data_name_for_pod;
    use crate::types::{Data, DataItem, DataSet, DataSetSpec, DataSpec};
    use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
    use kube::api::ObjectMeta;
    use kube::ResourceExt;
    use std::collections::BTreeMap;

    fn string_map(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        if pairs.is_empty() {
            return None;
        }
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn data_item(name: &str) -> DataItem {
        DataItem {
            name: name.to_string(),
            namespace: "models".to_string(),
            remote_path: format!("/models/{}", name),
            local_path: format!("/data/{}", name),
            version: "v1".to_string(),
            data_source_type: "hdfs".to_string(),
            lifecycle: None,
        }
    }

    pub fn template(items: &[&str]) -> DataSpec {
        DataSpec {
            data_items: items.iter().map(|n| data_item(n)).collect(),
            ..Default::default()
        }
    }

    /// A pod with a single `main` container
    pub fn pod(name: &str, namespace: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: string_map(labels),
                annotations: string_map(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    image: Some("nginx:1.27".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        }
    }

    pub fn dataset(name: &str, namespace: &str, selector: &[(&str, &str)], items: &[&str]) -> DataSet {
        let mut dataset = DataSet::new(
            name,
            DataSetSpec {
                template: template(items),
                workload_selector: string_map(selector).unwrap_or_default(),
            },
        );
        dataset.metadata.namespace = Some(namespace.to_string());
        dataset.metadata.uid = Some(format!("uid-dataset-{}", name));
        dataset
    }

    /// The Data `dataset_name` would create for `pod`
    pub fn data(dataset_name: &str, pod: &Pod, items: &[&str]) -> Data {
        let pod_name = pod.name_any();
        let mut data = Data::new(&data_name_for_pod(dataset_name, &pod_name), template(items));
        data.metadata.namespace = pod.namespace();
        data.metadata.labels = string_map(&[
            (labels::DATASET, dataset_name),
            (labels::POD, pod_name.as_str()),
        ]);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced_status_path() {
        let target = parse_path("/apis/data.kuda.io/v1alpha1/namespaces/ns/datas/foo/status").unwrap();
        assert_eq!(target.api_version, "data.kuda.io/v1alpha1");
        assert_eq!(target.plural, "datas");
        assert_eq!(target.namespace.as_deref(), Some("ns"));
        assert_eq!(target.name.as_deref(), Some("foo"));
        assert!(target.status);
    }

    #[test]
    fn test_parse_core_collection_path() {
        let target = parse_path("/api/v1/namespaces/ns/pods").unwrap();
        assert_eq!(target.api_version, "v1");
        assert_eq!(target.plural, "pods");
        assert!(target.name.is_none());
    }

    #[test]
    fn test_parse_encoded_label_selector() {
        let selector = parse_label_selector(Some("labelSelector=kuda.io%2Fdataset%3Dds%2Capp%3Dx"));
        assert_eq!(
            selector,
            vec![
                ("kuda.io/dataset".to_string(), "ds".to_string()),
                ("app".to_string(), "x".to_string())
            ]
        );
    }
}
