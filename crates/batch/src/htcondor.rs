//! HTCondor batch plugin: shells out to `condor_q`/`condor_status` and
//! parses their output, exactly as the original Python plugin did.

use std::{
    collections::{HashMap, HashSet},
    net::Ipv4Addr,
    sync::Arc,
};

use anyhow::{Result, bail};
use ekacore::{
    clock::{Clock, SystemClock},
    process,
};
use quick_xml::{events::Event, reader::Reader};
use tracing::debug;

use crate::{
    registry::BatchPlugin,
    resolver,
    status::{WorkerMap, WorkerStatus},
};

pub struct HtCondorPlugin {
    clock: Arc<dyn Clock>,
}

impl HtCondorPlugin {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for HtCondorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchPlugin for HtCondorPlugin {
    fn poll_queue(&self) -> Result<Option<u64>> {
        let output = process::run(&["condor_q", "-attributes", "JobStatus", "-long"], 5, true);
        Ok(output
            .filter(|o| o.exit_code == 0)
            .map(|o| o.stdout_str().matches("JobStatus = 1").count() as u64))
    }

    fn poll_status(
        &self,
        previous: &WorkerMap,
        valid_ips: Option<&HashSet<Ipv4Addr>>,
    ) -> Result<Option<WorkerMap>> {
        let Some(output) = process::run(
            &["condor_status", "-xml", "-attributes", "Activity,Machine"],
            2,
            true,
        ) else {
            return Ok(None);
        };
        if output.exit_code != 0 {
            return Ok(None);
        }

        let entries = match parse_machine_entries(&output.stdout_str()) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(%err, "invalid XML from condor_status");
                return Ok(None);
            }
        };

        let mut job_counts: HashMap<String, u32> = HashMap::new();
        for (host, idle) in entries {
            if let Some(valid) = valid_ips {
                match resolver::resolve(&host) {
                    Ok(ip) if valid.contains(&ip) => {}
                    _ => {
                        debug!(host, "poll status: ignored (no matching VM)");
                        continue;
                    }
                }
            }

            job_counts
                .entry(host)
                .and_modify(|jobs| {
                    if !idle {
                        *jobs += 1;
                    }
                })
                .or_insert(if idle { 0 } else { 1 });
        }

        let now = self.clock.now();
        let mut workers_status = WorkerMap::new();
        for (host, jobs) in job_counts {
            let unchanged_since = match previous.get(&host) {
                Some(prev) if prev.jobs == jobs => prev.unchanged_since,
                _ => now,
            };
            workers_status.insert(host, WorkerStatus { jobs, unchanged_since });
        }

        Ok(Some(workers_status))
    }
}

/// Walks `condor_status -xml` output, yielding `(machine, is_idle)` for each
/// `<c>` record whose `MyType` is `Machine` and which carries both a
/// `Machine` and an `Activity` value. Matches the original's
/// `ElementTree.findall("./c")` / `findall("./a")` walk.
fn parse_machine_entries(xml: &str) -> Result<Vec<(String, bool)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut entries = Vec::new();

    let mut my_type: Option<String> = None;
    let mut machine: Option<String> = None;
    let mut activity: Option<String> = None;
    let mut current_attr: Option<String> = None;
    let mut in_record = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"c" => {
                    in_record = true;
                    my_type = None;
                    machine = None;
                    activity = None;
                }
                b"a" if in_record => {
                    current_attr = tag
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"n")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                }
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if let Some(name) = current_attr.as_deref() {
                    let value = text.unescape()?.into_owned();
                    match name {
                        "MyType" => my_type = Some(value),
                        "Machine" => machine = Some(value),
                        "Activity" => activity = Some(value),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(tag)) => match tag.name().as_ref() {
                b"a" => current_attr = None,
                b"c" => {
                    in_record = false;
                    if my_type.as_deref() == Some("Machine") {
                        if let (Some(host), Some(act)) = (machine.take(), activity.take()) {
                            entries.push((host, act == "Idle"));
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => bail!("invalid XML: {err}"),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0"?>
<classads>
  <c>
    <a n="MyType"><s>Machine</s></a>
    <a n="Machine"><s>host-a.example.org</s></a>
    <a n="Activity"><s>Idle</s></a>
  </c>
  <c>
    <a n="MyType"><s>Machine</s></a>
    <a n="Machine"><s>host-b.example.org</s></a>
    <a n="Activity"><s>Busy</s></a>
  </c>
  <c>
    <a n="MyType"><s>Machine</s></a>
    <a n="Machine"><s>host-b.example.org</s></a>
    <a n="Activity"><s>Busy</s></a>
  </c>
  <c>
    <a n="MyType"><s>Other</s></a>
    <a n="Machine"><s>ignored.example.org</s></a>
    <a n="Activity"><s>Busy</s></a>
  </c>
</classads>"#;

    #[test]
    fn parses_only_machine_records() {
        let entries = parse_machine_entries(SAMPLE_XML).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|(h, _)| h != "ignored.example.org"));
    }

    #[test]
    fn invalid_xml_is_rejected() {
        assert!(parse_machine_entries("not xml at all <<<").is_err() || parse_machine_entries("not xml at all <<<").unwrap().is_empty());
    }

    #[test]
    fn aggregates_job_counts_per_machine() {
        let plugin = HtCondorPlugin::new();
        let previous = WorkerMap::new();

        // We can't run condor_status in tests, so exercise the aggregation
        // logic directly through the parse step plus the same counting rule
        // poll_status applies.
        let entries = parse_machine_entries(SAMPLE_XML).unwrap();
        let mut counts: HashMap<String, u32> = HashMap::new();
        for (host, idle) in entries {
            counts
                .entry(host)
                .and_modify(|j| if !idle { *j += 1 })
                .or_insert(if idle { 0 } else { 1 });
        }
        assert_eq!(counts["host-a.example.org"], 0);
        assert_eq!(counts["host-b.example.org"], 2);
        let _ = (plugin, previous);
    }
}
