//! Refreshes the address-metadata cache from EC2 inventory. Runs a
//! blocking initial refresh at startup, then loops every 60 seconds; a
//! failed refresh leaves the previous snapshot in place.

use aws_sdk_ec2::Client as Ec2Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vxprobe_core::metadata::{HostAddr, HostMetadata, MetadataCache};

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

const TAG_NAME: &str = "Name";
const TAG_ASG: &str = "aws:autoscaling:groupName";
const TAG_OWNER: &str = "Owner";

/// Performs the blocking startup refresh so the first report window is
/// already enriched. Call this once, synchronously awaited, before
/// spawning `run_loop`.
pub async fn initial_refresh(client: &Ec2Client, vpc_id: Option<&str>, cache: &MetadataCache) {
    refresh_once(client, vpc_id, cache).await;
}

/// Runs the background refresh loop forever, every `REFRESH_INTERVAL`.
/// Intended to be spawned as a tokio task after `initial_refresh`; returns
/// only if `stop` becomes true.
pub async fn run_loop(
    client: Ec2Client,
    vpc_id: Option<String>,
    cache: Arc<MetadataCache>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    interval.tick().await; // skip the immediate first tick, we already refreshed at startup
    loop {
        tokio::select! {
            _ = interval.tick() => {
                refresh_once(&client, vpc_id.as_deref(), &cache).await;
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    return;
                }
            }
        }
    }
}

async fn refresh_once(client: &Ec2Client, vpc_id: Option<&str>, cache: &MetadataCache) {
    match build_snapshot(client, vpc_id).await {
        Ok((snapshot, conflicts)) => {
            let size = snapshot.len();
            cache.publish(snapshot);
            if conflicts > 0 {
                warn!(conflicts, "inventory refresh saw address reused by multiple instances");
            }
            info!(addresses = size, "metadata cache refreshed");
        }
        Err(e) => {
            warn!(error = %e, "metadata cache refresh failed, keeping previous snapshot");
        }
    }
}

async fn build_snapshot(
    client: &Ec2Client,
    vpc_id: Option<&str>,
) -> anyhow::Result<(HashMap<HostAddr, HostMetadata>, u64)> {
    let mut snapshot = HashMap::new();
    let mut conflicts = 0u64;

    let mut req = client.describe_instances();
    if let Some(vpc) = vpc_id {
        req = req.filters(
            aws_sdk_ec2::types::Filter::builder()
                .name("vpc-id")
                .values(vpc)
                .build(),
        );
    }

    let mut paginator = req.into_paginator().send();
    while let Some(page) = paginator.next().await {
        let page = page?;
        for reservation in page.reservations() {
            for instance in reservation.instances() {
                let meta = metadata_from_tags(instance.tags());
                let instance_id = instance.instance_id().unwrap_or_default();
                let meta = HostMetadata {
                    instance_id: instance_id.to_string(),
                    ..meta
                };
                for iface in instance.network_interfaces() {
                    for addr in iface.private_ip_addresses() {
                        if let Some(ip_str) = addr.private_ip_address() {
                            if let Ok(ip) = ip_str.parse::<std::net::Ipv4Addr>() {
                                let key = u32::from_be_bytes(ip.octets());
                                if snapshot.insert(key, meta.clone()).is_some() {
                                    conflicts += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    Ok((snapshot, conflicts))
}

fn metadata_from_tags(tags: &[aws_sdk_ec2::types::Tag]) -> HostMetadata {
    let mut meta = HostMetadata::default();
    for tag in tags {
        let (Some(key), Some(value)) = (tag.key(), tag.value()) else {
            continue;
        };
        match key {
            TAG_NAME => meta.name = value.to_string(),
            TAG_ASG => meta.asg = value.to_string(),
            TAG_OWNER => meta.owner = value.to_string(),
            _ => {}
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_from_tags_picks_known_keys_only() {
        let tags = vec![
            aws_sdk_ec2::types::Tag::builder()
                .key(TAG_NAME)
                .value("web-1")
                .build(),
            aws_sdk_ec2::types::Tag::builder()
                .key("Unrelated")
                .value("ignored")
                .build(),
        ];
        let meta = metadata_from_tags(&tags);
        assert_eq!(meta.name, "web-1");
        assert_eq!(meta.asg, "");
    }
}
