mod kube;

pub use kube::{reissue, rewrite_ca, Kubeconfig, KubeconfigError};
