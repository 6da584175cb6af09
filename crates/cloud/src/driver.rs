use std::{collections::HashSet, net::Ipv4Addr, str::FromStr};

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_ec2::{Client, types::InstanceStateName};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::{
    config::CloudConfig,
    instance::{Instance, InstanceState},
};

/// The narrow EC2-compatible surface the scheduler needs: list running
/// instances, launch from the configured image, terminate by handle.
///
/// All operations may fail transiently; implementations must not panic on a
/// failing remote call. The scheduler relies on `Ok(None)` / counted
/// per-instance failures to keep going.
#[async_trait]
pub trait CloudDriver: Send + Sync {
    /// Lists running instances, optionally restricted to those whose
    /// private IPv4 is in `filter_ips`. `None` on a transient failure to
    /// reach the endpoint.
    async fn list_running(&self, filter_ips: Option<&HashSet<Ipv4Addr>>) -> Result<Option<Vec<Instance>>>;

    /// Requests one new instance from the configured image. Counted as a
    /// single failure by the caller if this errors; never panics.
    async fn launch(&self) -> Result<Instance>;

    /// Requests termination of the given instance.
    async fn terminate(&self, instance: &Instance) -> Result<()>;
}

/// Cloud driver backed by `aws-sdk-ec2`, pointed at an arbitrary
/// EC2-compatible endpoint (not necessarily AWS proper) configured via
/// `ec2.api_url`.
pub struct Ec2Driver {
    client: Client,
    config: CloudConfig,
    image_confirmed: Mutex<Option<bool>>,
}

impl Ec2Driver {
    #[instrument(skip(config), fields(api_url = %config.api_url))]
    pub async fn connect(config: CloudConfig) -> Result<Self> {
        let credentials = Credentials::new(
            config.aws_access_key_id.clone(),
            config.aws_secret_access_key.clone(),
            None,
            None,
            "elastiq-config",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("elastiq"))
            .endpoint_url(&config.api_url)
            .credentials_provider(credentials)
            .load()
            .await;

        let client = Client::new(&sdk_config);

        Ok(Self {
            client,
            config,
            image_confirmed: Mutex::new(None),
        })
    }

    /// Confirms the configured image id exists, caching the result the way
    /// the original cached its boto `Image` object after the first lookup.
    async fn ensure_image(&self) -> bool {
        let mut cached = self.image_confirmed.lock().await;
        if let Some(found) = *cached {
            return found;
        }

        let found = match self
            .client
            .describe_images()
            .image_ids(&self.config.image_id)
            .send()
            .await
        {
            Ok(out) => out
                .images()
                .iter()
                .any(|img| img.image_id() == Some(self.config.image_id.as_str())),
            Err(err) => {
                error!(%err, "cannot make EC2 connection to retrieve image info");
                false
            }
        };

        *cached = Some(found);
        found
    }
}

#[async_trait]
impl CloudDriver for Ec2Driver {
    #[instrument(skip(self))]
    async fn list_running(&self, filter_ips: Option<&HashSet<Ipv4Addr>>) -> Result<Option<Vec<Instance>>> {
        let resp = match self.client.describe_instances().send().await {
            Ok(resp) => resp,
            Err(err) => {
                error!(%err, "can't get list of EC2 instances (maybe wrong credentials?)");
                return Ok(None);
            }
        };

        let mut running = Vec::new();
        for reservation in resp.reservations() {
            for inst in reservation.instances() {
                let is_running = inst
                    .state()
                    .and_then(|s| s.name())
                    .map(|name| *name == InstanceStateName::Running)
                    .unwrap_or(false);
                if !is_running {
                    continue;
                }

                let Some(ip_str) = inst.private_ip_address() else {
                    continue;
                };
                let Ok(ip) = Ipv4Addr::from_str(ip_str) else {
                    continue;
                };
                let Some(id) = inst.instance_id() else {
                    continue;
                };

                if let Some(filter) = filter_ips {
                    if !filter.contains(&ip) {
                        debug!(%ip, "cannot find instance in the list of known IPs");
                        continue;
                    }
                }

                running.push(Instance {
                    id: id.to_string(),
                    private_ipv4: ip,
                    state: InstanceState::Running,
                });
            }
        }

        Ok(Some(running))
    }

    #[instrument(skip(self))]
    async fn launch(&self) -> Result<Instance> {
        if !self.ensure_image().await {
            anyhow::bail!("image id {} not found", self.config.image_id);
        }

        let mut request = self
            .client
            .run_instances()
            .image_id(&self.config.image_id)
            .min_count(1)
            .max_count(1);

        if !self.config.key_name.is_empty() {
            request = request.key_name(&self.config.key_name);
        }
        if !self.config.flavour.is_empty() {
            request = request.instance_type(self.config.flavour.as_str().into());
        }
        if !self.config.user_data.is_empty() {
            request = request.user_data(base64_encode(&self.config.user_data));
        }

        let resp = request
            .send()
            .await
            .context("cannot run instance via EC2: check your \"hard\" quota")?;

        let inst = resp
            .instances()
            .first()
            .context("EC2 did not return the launched instance")?;

        let id = inst
            .instance_id()
            .context("launched instance has no id")?
            .to_string();
        let ip = inst
            .private_ip_address()
            .and_then(|s| Ipv4Addr::from_str(s).ok());

        info!(%id, "VM launched OK");

        Ok(Instance {
            id,
            private_ipv4: ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            state: InstanceState::Running,
        })
    }

    #[instrument(skip(self))]
    async fn terminate(&self, instance: &Instance) -> Result<()> {
        self.client
            .terminate_instances()
            .instance_ids(&instance.id)
            .send()
            .await
            .with_context(|| format!("shutdown via EC2 failed for {}", instance.private_ipv4))?;

        debug!(ip = %instance.private_ipv4, "shutdown via EC2 succeeded");
        Ok(())
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysRunning;

    #[async_trait]
    impl CloudDriver for AlwaysRunning {
        async fn list_running(&self, _filter_ips: Option<&HashSet<Ipv4Addr>>) -> Result<Option<Vec<Instance>>> {
            Ok(Some(vec![]))
        }
        async fn launch(&self) -> Result<Instance> {
            Ok(Instance {
                id: "i-fake".into(),
                private_ipv4: Ipv4Addr::new(10, 0, 0, 1),
                state: InstanceState::Running,
            })
        }
        async fn terminate(&self, _instance: &Instance) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_object_is_usable_as_dyn() {
        let driver: Box<dyn CloudDriver> = Box::new(AlwaysRunning);
        let inst = driver.launch().await.unwrap();
        assert_eq!(inst.id, "i-fake");
        driver.terminate(&inst).await.unwrap();
    }
}
