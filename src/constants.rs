// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Label keys placed on `Data` resources
pub mod labels {
    /// Name of the owning DataSet
    pub const DATASET: &str = "kuda.io/dataset";
    /// Name of the pod the Data provisions
    pub const POD: &str = "kuda.io/pod";
    /// Marks objects created by the operator
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
}

/// Pod annotation keys
pub mod annotations {
    /// DataSet selected for the pod at admission time
    pub const DATASET: &str = "kuda.io/dataset";
    /// Fingerprint of the Data spec the runtime should download
    pub const DIGEST: &str = "kuda.io/data-digest";
}

/// Environment variables handed to the runtime sidecar
pub mod runtime_env {
    pub const DATASET_NAME: &str = "KUDA_DATASET_NAME";
    pub const DATASET_NAMESPACE: &str = "KUDA_DATASET_NAMESPACE";
    pub const POD_NAME: &str = "MY_POD_NAME";
    pub const MAIN_CONTAINER_NAME: &str = "MAIN_CONTAINER_NAME";
}

/// Names used by the pod injector
pub mod injection {
    pub const SIDECAR_CONTAINER_NAME: &str = "kuda-runtime";
    pub const VOLUME_SHARE_DATA: &str = "share-data";
    pub const VOLUME_HOST_DATA: &str = "host-data";
    pub const VOLUME_POD_DATA: &str = "pod-data";
    pub const POD_INFO_MOUNT_PATH: &str = "/etc/podinfo";
    pub const AFFINITY_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
}

/// RBAC objects granting the runtime sidecar access to its Data
pub mod rbac {
    pub const RUNTIME_CLUSTER_ROLE: &str = "kuda-runtime-role";
    pub const RUNTIME_ROLE_BINDING_SUFFIX: &str = "kuda-runtime-rolebinding";
    pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
}

/// Finalizer keeping a Data around until its pod annotation is cleared
pub const DATA_FINALIZER: &str = "kuda.io/finalizer";

/// The operator name used as field manager and managed-by value
pub const OPERATOR_NAME: &str = "kuda";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
