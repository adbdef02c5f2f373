// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Turns pod creations and deletions into DataSet reconcile triggers.
//!
//! Pods are attributed to a DataSet through the annotation the injector
//! stamps on them at admission. Pod updates never trigger; the sidecar
//! rewrites pod annotations constantly.

use crate::constants::annotations;
use crate::types::DataSet;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, watcher, Event};
use kube::{Api, ResourceExt};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// The DataSet a pod was injected for, if any
pub fn dataset_ref(pod: &Pod) -> Option<ObjectRef<DataSet>> {
    let name = pod
        .annotations()
        .get(annotations::DATASET)
        .filter(|n| !n.is_empty())?;
    let namespace = pod.namespace()?;
    Some(ObjectRef::new(name).within(&namespace))
}

fn pod_key(pod: &Pod) -> String {
    pod.uid().unwrap_or_else(|| {
        format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
    })
}

#[derive(Default)]
pub struct PodEventFilter {
    known: HashMap<String, Option<ObjectRef<DataSet>>>,
    relisted: Option<HashSet<String>>,
}

impl PodEventFilter {
    /// DataSets to reconcile in response to `event`.
    ///
    /// A pod seen for the first time counts as created. A relist that no
    /// longer contains a known pod counts as its deletion.
    pub fn triggers(&mut self, event: Event<Pod>) -> Vec<ObjectRef<DataSet>> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(pod) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(pod_key(&pod));
                }
                self.observe(&pod)
            }
            Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|k| !relisted.contains(*k))
                    .cloned()
                    .collect();
                gone.iter()
                    .filter_map(|k| self.known.remove(k).flatten())
                    .collect()
            }
            Event::Apply(pod) => self.observe(&pod),
            Event::Delete(pod) => {
                self.known.remove(&pod_key(&pod));
                dataset_ref(&pod).into_iter().collect()
            }
        }
    }

    fn observe(&mut self, pod: &Pod) -> Vec<ObjectRef<DataSet>> {
        let key = pod_key(pod);
        if self.known.contains_key(&key) {
            return Vec::new();
        }
        let target = dataset_ref(pod);
        self.known.insert(key, target.clone());
        target.into_iter().collect()
    }
}

/// Stream of DataSet triggers derived from a cluster wide pod watch
pub fn pod_triggers(pods: Api<Pod>) -> impl Stream<Item = ObjectRef<DataSet>> + Send + 'static {
    watcher(pods, watcher::Config::default())
        .scan(PodEventFilter::default(), |filter, event| {
            let triggers = match event {
                Ok(event) => filter.triggers(event),
                Err(e) => {
                    warn!("Pod watch error: {}", e);
                    Vec::new()
                }
            };
            futures::future::ready(Some(triggers))
        })
        .flat_map(futures::stream::iter)
}
