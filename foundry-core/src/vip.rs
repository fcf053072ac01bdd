//! VIP Manifest Generator (C8): emits the kube-vip DaemonSet, RBAC,
//! cloud-provider Deployment, and address-pool ConfigMap manifests for a
//! given VIP + interface.

use std::net::Ipv4Addr;

use thiserror::Error;

use foundry_common::Error as CoreError;

const KUBE_VIP_IMAGE: &str = "ghcr.io/kube-vip/kube-vip:v0.6.4";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VipError {
    #[error("{0} is not a parseable IPv4 address")]
    NotIpv4(String),
    #[error("{0} is not in RFC1918 private address space")]
    NotPrivate(String),
}

impl From<VipError> for CoreError {
    fn from(e: VipError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

/// Requires a parseable IPv4 address in RFC1918 space (10/8, 172.16/12,
/// 192.168/16).
pub fn validate_vip(vip: &str) -> Result<Ipv4Addr, VipError> {
    let addr: Ipv4Addr = vip
        .parse()
        .map_err(|_| VipError::NotIpv4(vip.to_string()))?;
    let octets = addr.octets();
    let is_private = octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168);
    if !is_private {
        return Err(VipError::NotPrivate(vip.to_string()));
    }
    Ok(addr)
}

fn rbac_manifest() -> String {
    r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: kube-vip
  namespace: kube-system
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: system:kube-vip-role
rules:
  - apiGroups: [""]
    resources: ["services", "endpoints", "nodes", "pods"]
    verbs: ["list", "get", "watch", "update"]
  - apiGroups: [""]
    resources: ["services/status"]
    verbs: ["update", "patch"]
  - apiGroups: [""]
    resources: ["configmaps"]
    verbs: ["list", "get", "watch", "update", "create"]
  - apiGroups: ["coordination.k8s.io"]
    resources: ["leases"]
    verbs: ["list", "get", "watch", "update", "create"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: system:kube-vip-binding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: system:kube-vip-role
subjects:
  - kind: ServiceAccount
    name: kube-vip
    namespace: kube-system"#
        .to_string()
}

fn cloud_provider_manifest() -> String {
    r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: kube-vip-cloud-provider
  namespace: kube-system
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: system:kube-vip-cloud-provider-role
rules:
  - apiGroups: [""]
    resources: ["services", "services/status", "nodes", "endpoints"]
    verbs: ["list", "get", "watch", "update", "patch"]
  - apiGroups: [""]
    resources: ["configmaps"]
    verbs: ["list", "get", "watch", "update", "create"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: system:kube-vip-cloud-provider-binding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: system:kube-vip-cloud-provider-role
subjects:
  - kind: ServiceAccount
    name: kube-vip-cloud-provider
    namespace: kube-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: kube-vip-cloud-provider
  namespace: kube-system
spec:
  replicas: 1
  selector:
    matchLabels:
      app: kube-vip-cloud-provider
  template:
    metadata:
      labels:
        app: kube-vip-cloud-provider
    spec:
      serviceAccountName: kube-vip-cloud-provider
      containers:
        - name: kube-vip-cloud-provider
          image: ghcr.io/kube-vip/kube-vip-cloud-provider:v0.0.7
          args:
            - --leader-elect-resource-name=kube-vip-cloud-controller"#
        .to_string()
}

fn address_pool_configmap(vip: &Ipv4Addr) -> String {
    format!(
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: kubevip
  namespace: kube-system
data:
  cidr-global: "{vip}/32"
  allow-share-global: "true""#
    )
}

fn daemonset_manifest(vip: &Ipv4Addr, iface: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: kube-vip
  namespace: kube-system
spec:
  selector:
    matchLabels:
      app: kube-vip
  template:
    metadata:
      labels:
        app: kube-vip
    spec:
      nodeSelector:
        node-role.kubernetes.io/control-plane: "true"
      hostNetwork: true
      containers:
        - name: kube-vip
          image: {KUBE_VIP_IMAGE}
          securityContext:
            capabilities:
              add:
                - NET_ADMIN
                - NET_RAW
          env:
            - name: vip_interface
              value: "{iface}"
            - name: vip_address
              value: "{vip}"
            - name: vip_cidr
              value: "32"
            - name: cp_enable
              value: "true"
            - name: svc_enable
              value: "true"
            - name: vip_arp
              value: "true"
            - name: vip_leaderelection
              value: "true"
            - name: vip_leaseduration
              value: "5"
            - name: vip_renewdeadline
              value: "3"
            - name: vip_retryperiod
              value: "1"
          volumeMounts:
            - name: kubeconfig
              mountPath: /etc/rancher/k3s/k3s.yaml
              readOnly: true
      volumes:
        - name: kubeconfig
          hostPath:
            path: /etc/rancher/k3s/k3s.yaml"#
    )
}

/// Combines all four manifests with `---` separators.
pub fn generate(vip: &str, iface: &str) -> Result<String, VipError> {
    let addr = validate_vip(vip)?;
    Ok([
        rbac_manifest(),
        cloud_provider_manifest(),
        address_pool_configmap(&addr),
        daemonset_manifest(&addr, iface),
    ]
    .join("\n---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_vip_accepts_each_rfc1918_block() {
        assert!(validate_vip("10.0.0.1").is_ok());
        assert!(validate_vip("172.16.0.1").is_ok());
        assert!(validate_vip("172.31.255.254").is_ok());
        assert!(validate_vip("192.168.1.100").is_ok());
    }

    #[test]
    fn validate_vip_rejects_public_ipv4() {
        assert_eq!(
            validate_vip("8.8.8.8"),
            Err(VipError::NotPrivate("8.8.8.8".to_string()))
        );
    }

    #[test]
    fn validate_vip_rejects_ipv6_and_empty_and_garbage() {
        assert!(validate_vip("::1").is_err());
        assert!(validate_vip("").is_err());
        assert!(validate_vip("not-an-ip").is_err());
    }

    #[test]
    fn validate_vip_rejects_172_outside_the_12_bit_block() {
        assert!(validate_vip("172.32.0.1").is_err());
        assert!(validate_vip("172.15.0.1").is_err());
    }

    #[test]
    fn generate_combines_four_documents_with_separators() {
        let manifest = generate("192.168.1.100", "eth0").unwrap();
        assert_eq!(manifest.matches("---").count(), 3);
        assert!(manifest.contains("kind: DaemonSet"));
        assert!(manifest.contains("kind: ConfigMap"));
        assert!(manifest.contains("kind: ClusterRoleBinding"));
        assert!(manifest.contains("vip_address"));
        assert!(manifest.contains("192.168.1.100"));
        assert!(manifest.contains("eth0"));
    }

    #[test]
    fn generate_rejects_an_invalid_vip_before_emitting_anything() {
        assert!(generate("8.8.8.8", "eth0").is_err());
    }
}
