//! Cloud gateway backed by the `aws` command line client.
//!
//! Credentials, endpoints and retries are the CLI's business. This adapter
//! maps the tool's resource kinds onto CLI calls and classifies failures
//! from the CLI's error output.

use super::process::{self, describe};
use crate::collaborators::{CloudContext, CloudGateway, ExecutionError, GatewayError, ResourceSpec};
use crate::state::ResourceKind;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";
const LIVE_INSTANCE_STATES: &str = "Name=instance-state-name,Values=pending,running,stopping,stopped";

pub struct AwsCliGateway {
    program: String,
    context: CloudContext,
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Maps CLI error output onto the gateway's failure classes.
pub fn classify_error(stderr: &str) -> GatewayError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("cloud call failed")
        .trim()
        .to_string();

    const PERMISSION: &[&str] = &[
        "AccessDenied",
        "UnauthorizedOperation",
        "AuthFailure",
        "InvalidClientTokenId",
        "ExpiredToken",
        "Forbidden",
        "Unable to locate credentials",
    ];
    const QUOTA: &[&str] = &["LimitExceeded", "TooManyBuckets", "QuotaExceeded"];
    const TIMEOUT: &[&str] = &["RequestTimeout", "timed out", "Read timeout", "Connect timeout"];
    const NOT_FOUND: &[&str] = &["NotFound", "NoSuch", "(404)"];

    let has = |markers: &[&str]| markers.iter().any(|m| stderr.contains(m));

    if has(PERMISSION) {
        GatewayError::PermissionDenied(message)
    } else if has(QUOTA) {
        GatewayError::QuotaExceeded(message)
    } else if has(TIMEOUT) {
        GatewayError::Timeout(message)
    } else if has(NOT_FOUND) {
        GatewayError::NotFound(message)
    } else {
        GatewayError::Other(message)
    }
}

/// `ResourceType=<type>,Tags=[{Key=k,Value=v},...]`
pub fn tag_specification(resource_type: &str, tags: &BTreeMap<String, String>) -> String {
    let rendered: Vec<String> = tags
        .iter()
        .map(|(k, v)| format!("{{Key={},Value={}}}", k, v))
        .collect();
    format!("ResourceType={},Tags=[{}]", resource_type, rendered.join(","))
}

/// Read-only access to every object in the bucket.
pub fn public_read_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicReadGetObject",
            "Effect": "Allow",
            "Principal": "*",
            "Action": ["s3:GetObject"],
            "Resource": format!("arn:aws:s3:::{}/*", bucket),
        }]
    })
    .to_string()
}

/// Index and error documents both point at `index.html` for client-side routing.
fn website_configuration() -> String {
    json!({
        "IndexDocument": {"Suffix": "index.html"},
        "ErrorDocument": {"Key": "index.html"},
    })
    .to_string()
}

/// Boot script authorizing `public_key` for the image's default user.
pub fn cloud_config(public_key: &str) -> String {
    format!("#cloud-config\nssh_authorized_keys:\n  - {}\n", public_key.trim())
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_string),
        _ => None,
    }
}

/// The ingress rule being authorized already exists on the group.
pub fn is_duplicate_rule(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Other(message) if message.contains("InvalidPermission.Duplicate"))
}

fn not_found_as_none<T>(result: Result<Option<T>, GatewayError>) -> Result<Option<T>, GatewayError> {
    match result {
        Err(GatewayError::NotFound(_)) => Ok(None),
        other => other,
    }
}

impl AwsCliGateway {
    pub fn new(context: CloudContext) -> Self {
        Self {
            program: "aws".to_string(),
            context,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn base_args(&self) -> Vec<String> {
        let mut base = args(&["--region", &self.context.region]);
        if let Some(ref profile) = self.context.profile {
            base.push("--profile".to_string());
            base.push(profile.clone());
        }
        base.push("--output".to_string());
        base.push("json".to_string());
        base
    }

    async fn call(&self, call_args: Vec<String>) -> Result<String, GatewayError> {
        let mut full = self.base_args();
        full.extend(call_args);
        let rendered = describe(&self.program, &full);

        let mut command = Command::new(&self.program);
        command.args(&full);
        match process::run(command, &rendered).await {
            Ok(output) => Ok(output.stdout),
            Err(ExecutionError::NonZeroExit { stderr, .. }) => Err(classify_error(&stderr)),
            Err(e) => Err(GatewayError::Other(e.to_string())),
        }
    }

    async fn call_json(&self, call_args: Vec<String>) -> Result<Value, GatewayError> {
        let stdout = self.call(call_args).await?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout)
            .map_err(|e| GatewayError::Other(format!("unreadable cloud response: {}", e)))
    }

    async fn call_id(&self, call_args: Vec<String>, what: &str) -> Result<String, GatewayError> {
        let value = self.call_json(call_args).await?;
        first_string(&value)
            .ok_or_else(|| GatewayError::Other(format!("cloud response carried no {}", what)))
    }

    async fn create_bucket(&self, spec: &ResourceSpec) -> Result<String, GatewayError> {
        let mut create = args(&["s3api", "create-bucket", "--bucket", &spec.name]);
        if spec.region != "us-east-1" {
            create.push("--create-bucket-configuration".to_string());
            create.push(format!("LocationConstraint={}", spec.region));
        }
        self.call(create).await?;

        if let Err(e) = self.configure_bucket(&spec.name, &spec.tags).await {
            warn!(bucket = %spec.name, error = %e, "Bucket setup failed, removing bucket");
            if let Err(cleanup) = self
                .call(args(&["s3api", "delete-bucket", "--bucket", &spec.name]))
                .await
            {
                warn!(bucket = %spec.name, error = %cleanup, "Could not remove half-configured bucket");
            }
            return Err(e);
        }
        Ok(spec.name.clone())
    }

    /// Public-access unblock, website hosting and tags. Every call overwrites,
    /// so rerunning it on a configured bucket changes nothing.
    async fn configure_bucket(
        &self,
        bucket: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        self.call(args(&[
            "s3api",
            "put-public-access-block",
            "--bucket",
            bucket,
            "--public-access-block-configuration",
            "BlockPublicAcls=false,IgnorePublicAcls=false,BlockPublicPolicy=false,RestrictPublicBuckets=false",
        ]))
        .await?;

        self.call(args(&[
            "s3api",
            "put-bucket-website",
            "--bucket",
            bucket,
            "--website-configuration",
            &website_configuration(),
        ]))
        .await?;

        let tag_set: Vec<String> = tags
            .iter()
            .map(|(k, v)| format!("{{Key={},Value={}}}", k, v))
            .collect();
        self.call(args(&[
            "s3api",
            "put-bucket-tagging",
            "--bucket",
            bucket,
            "--tagging",
            &format!("TagSet=[{}]", tag_set.join(",")),
        ]))
        .await?;
        Ok(())
    }

    async fn create_policy(&self, spec: &ResourceSpec) -> Result<String, GatewayError> {
        let bucket = spec
            .depends_on
            .get(&ResourceKind::ObjectStoreBucket)
            .unwrap_or(&spec.name);
        self.call(args(&[
            "s3api",
            "put-bucket-policy",
            "--bucket",
            bucket,
            "--policy",
            &public_read_policy(bucket),
        ]))
        .await?;
        Ok(bucket.clone())
    }

    async fn create_instance(&self, spec: &ResourceSpec) -> Result<String, GatewayError> {
        let image = spec.image_id.as_deref().ok_or_else(|| {
            GatewayError::Other("no machine image configured; set DEPLOY_TOOL_IMAGE_ID".to_string())
        })?;
        let instance_type = spec.instance_type.as_deref().unwrap_or(DEFAULT_INSTANCE_TYPE);

        let mut run = args(&[
            "ec2",
            "run-instances",
            "--image-id",
            image,
            "--instance-type",
            instance_type,
            "--count",
            "1",
            "--tag-specifications",
            &tag_specification("instance", &spec.tags),
            "--query",
            "Instances[0].InstanceId",
        ]);
        if let Some(ref key_path) = spec.public_key_path {
            let key = tokio::fs::read_to_string(key_path).await.map_err(|e| {
                GatewayError::Other(format!("cannot read {}: {}", key_path.display(), e))
            })?;
            run.push("--user-data".to_string());
            run.push(cloud_config(&key));
        }

        self.call_id(run, "instance id").await
    }

    async fn create_security_group(&self, spec: &ResourceSpec) -> Result<String, GatewayError> {
        let instance = spec
            .depends_on
            .get(&ResourceKind::ComputeInstance)
            .ok_or_else(|| GatewayError::Other("security group needs a host to attach to".to_string()))?;

        let vpc = self
            .call_id(
                args(&[
                    "ec2",
                    "describe-instances",
                    "--instance-ids",
                    instance,
                    "--query",
                    "Reservations[0].Instances[0].VpcId",
                ]),
                "network id",
            )
            .await?;

        let group = self
            .call_id(
                args(&[
                    "ec2",
                    "create-security-group",
                    "--group-name",
                    &spec.name,
                    "--description",
                    &format!("Ingress for {}", spec.name),
                    "--vpc-id",
                    &vpc,
                    "--tag-specifications",
                    &tag_specification("security-group", &spec.tags),
                    "--query",
                    "GroupId",
                ]),
                "group id",
            )
            .await?;

        if let Err(e) = self.open_and_attach(&group, instance, &spec.ingress_ports).await {
            warn!(group = %group, error = %e, "Security group setup failed, removing group");
            if let Err(cleanup) = self
                .call(args(&["ec2", "delete-security-group", "--group-id", &group]))
                .await
            {
                warn!(group = %group, error = %cleanup, "Could not remove half-configured group");
            }
            return Err(e);
        }
        Ok(group)
    }

    async fn open_and_attach(
        &self,
        group: &str,
        instance: &str,
        ports: &[u16],
    ) -> Result<(), GatewayError> {
        for port in ports {
            let opened = self
                .call(args(&[
                    "ec2",
                    "authorize-security-group-ingress",
                    "--group-id",
                    group,
                    "--protocol",
                    "tcp",
                    "--port",
                    &port.to_string(),
                    "--cidr",
                    "0.0.0.0/0",
                ]))
                .await;
            match opened {
                Ok(_) => {}
                Err(ref e) if is_duplicate_rule(e) => {
                    debug!(group = %group, port, "Ingress rule already present");
                }
                Err(e) => return Err(e),
            }
        }
        self.call(args(&[
            "ec2",
            "modify-instance-attribute",
            "--instance-id",
            instance,
            "--groups",
            group,
        ]))
        .await?;
        Ok(())
    }

    async fn create_key_pair(&self, spec: &ResourceSpec) -> Result<String, GatewayError> {
        let key_path = spec.public_key_path.as_ref().ok_or_else(|| {
            GatewayError::Other("no SSH key configured; set DEPLOY_TOOL_SSH_KEY_PATH".to_string())
        })?;
        self.call_id(
            args(&[
                "ec2",
                "import-key-pair",
                "--key-name",
                &spec.name,
                "--public-key-material",
                &format!("fileb://{}", key_path.display()),
                "--tag-specifications",
                &tag_specification("key-pair", &spec.tags),
                "--query",
                "KeyPairId",
            ]),
            "key pair id",
        )
        .await
    }

    /// Moves every live instance off the group onto its network's default
    /// group so the group can be deleted.
    async fn detach_security_group(&self, group: &str) -> Result<(), GatewayError> {
        let attached = self
            .call_json(args(&[
                "ec2",
                "describe-instances",
                "--filters",
                &format!("Name=instance.group-id,Values={}", group),
                LIVE_INSTANCE_STATES,
                "--query",
                "Reservations[].Instances[].[InstanceId,VpcId]",
            ]))
            .await?;

        let pairs = attached.as_array().cloned().unwrap_or_default();
        for pair in pairs {
            let (Some(instance), Some(vpc)) = (
                pair.get(0).and_then(Value::as_str),
                pair.get(1).and_then(Value::as_str),
            ) else {
                continue;
            };
            let default_group = self
                .call_id(
                    args(&[
                        "ec2",
                        "describe-security-groups",
                        "--filters",
                        &format!("Name=vpc-id,Values={}", vpc),
                        "Name=group-name,Values=default",
                        "--query",
                        "SecurityGroups[].GroupId",
                    ]),
                    "default group id",
                )
                .await?;
            debug!(instance = %instance, group = %group, "Detaching security group");
            self.call(args(&[
                "ec2",
                "modify-instance-attribute",
                "--instance-id",
                instance,
                "--groups",
                &default_group,
            ]))
            .await?;
        }
        Ok(())
    }

    async fn lookup_first(&self, call_args: Vec<String>) -> Result<Option<String>, GatewayError> {
        not_found_as_none(self.call_json(call_args).await.map(|v| first_string(&v)))
    }
}

#[async_trait]
impl CloudGateway for AwsCliGateway {
    async fn create(&self, kind: ResourceKind, spec: &ResourceSpec) -> Result<String, GatewayError> {
        info!(kind = %kind, name = %spec.name, "Creating resource");
        match kind {
            ResourceKind::ObjectStoreBucket => self.create_bucket(spec).await,
            ResourceKind::BucketPolicy => self.create_policy(spec).await,
            ResourceKind::ComputeInstance => self.create_instance(spec).await,
            ResourceKind::SecurityGroup => self.create_security_group(spec).await,
            ResourceKind::KeyPair => self.create_key_pair(spec).await,
        }
    }

    async fn destroy(&self, kind: ResourceKind, external_id: &str) -> Result<(), GatewayError> {
        info!(kind = %kind, id = %external_id, "Destroying resource");
        match kind {
            ResourceKind::ObjectStoreBucket => {
                self.call(args(&[
                    "s3",
                    "rm",
                    &format!("s3://{}", external_id),
                    "--recursive",
                ]))
                .await?;
                self.call(args(&["s3api", "delete-bucket", "--bucket", external_id]))
                    .await?;
            }
            ResourceKind::BucketPolicy => {
                self.call(args(&["s3api", "delete-bucket-policy", "--bucket", external_id]))
                    .await?;
            }
            ResourceKind::ComputeInstance => {
                self.call(args(&[
                    "ec2",
                    "terminate-instances",
                    "--instance-ids",
                    external_id,
                ]))
                .await?;
            }
            ResourceKind::SecurityGroup => {
                self.detach_security_group(external_id).await?;
                self.call(args(&["ec2", "delete-security-group", "--group-id", external_id]))
                    .await?;
            }
            ResourceKind::KeyPair => {
                // deletion succeeds for unknown keys, so check first to notice drift
                self.call(args(&["ec2", "describe-key-pairs", "--key-pair-ids", external_id]))
                    .await?;
                self.call(args(&["ec2", "delete-key-pair", "--key-pair-id", external_id]))
                    .await?;
            }
        }
        Ok(())
    }

    async fn configure(
        &self,
        kind: ResourceKind,
        external_id: &str,
        spec: &ResourceSpec,
    ) -> Result<(), GatewayError> {
        info!(kind = %kind, id = %external_id, "Configuring resource");
        match kind {
            ResourceKind::ObjectStoreBucket => self.configure_bucket(external_id, &spec.tags).await,
            ResourceKind::BucketPolicy => self.create_policy(spec).await.map(|_| ()),
            ResourceKind::SecurityGroup => {
                let instance = spec.depends_on.get(&ResourceKind::ComputeInstance).ok_or_else(|| {
                    GatewayError::Other("security group needs a host to attach to".to_string())
                })?;
                self.open_and_attach(external_id, instance, &spec.ingress_ports)
                    .await
            }
            // launch and import carry their whole setup
            ResourceKind::ComputeInstance | ResourceKind::KeyPair => Ok(()),
        }
    }

    async fn lookup(&self, kind: ResourceKind, name: &str) -> Result<Option<String>, GatewayError> {
        match kind {
            ResourceKind::ObjectStoreBucket => not_found_as_none(
                self.call(args(&["s3api", "head-bucket", "--bucket", name]))
                    .await
                    .map(|_| Some(name.to_string())),
            ),
            ResourceKind::BucketPolicy => not_found_as_none(
                self.call(args(&["s3api", "get-bucket-policy", "--bucket", name]))
                    .await
                    .map(|_| Some(name.to_string())),
            ),
            ResourceKind::ComputeInstance => {
                self.lookup_first(args(&[
                    "ec2",
                    "describe-instances",
                    "--filters",
                    &format!("Name=tag:Name,Values={}", name),
                    LIVE_INSTANCE_STATES,
                    "--query",
                    "Reservations[].Instances[].InstanceId",
                ]))
                .await
            }
            ResourceKind::SecurityGroup => {
                self.lookup_first(args(&[
                    "ec2",
                    "describe-security-groups",
                    "--filters",
                    &format!("Name=group-name,Values={}", name),
                    "--query",
                    "SecurityGroups[].GroupId",
                ]))
                .await
            }
            ResourceKind::KeyPair => {
                self.lookup_first(args(&[
                    "ec2",
                    "describe-key-pairs",
                    "--key-names",
                    name,
                    "--query",
                    "KeyPairs[].KeyPairId",
                ]))
                .await
            }
        }
    }

    async fn upload_artifacts(&self, bucket: &str, artifacts: &Path) -> Result<(), GatewayError> {
        self.call(vec![
            "s3".to_string(),
            "sync".to_string(),
            artifacts.to_string_lossy().into_owned(),
            format!("s3://{}", bucket),
            "--delete".to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn public_address(&self, instance_id: &str) -> Result<String, GatewayError> {
        self.call(args(&["ec2", "wait", "instance-running", "--instance-ids", instance_id]))
            .await?;
        self.call_id(
            args(&[
                "ec2",
                "describe-instances",
                "--instance-ids",
                instance_id,
                "--query",
                "Reservations[0].Instances[0].PublicIpAddress",
            ]),
            "public address",
        )
        .await
        .map_err(|_| GatewayError::Other(format!("instance {} has no public address", instance_id)))
    }
}
