//! Normalized view over nmap's XML output.

use std::collections::BTreeSet;

use nethawk_core::model::{Protocol, Service};
use url::Url;

use crate::ScanError;

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub hosts: Vec<HostReport>,
    pub summary: Option<ScanSummary>,
}

#[derive(Debug, Clone)]
pub struct HostReport {
    pub addr: String,
    pub hostnames: Vec<String>,
    pub status: Option<String>,
    pub reason: Option<String>,
    pub ports: Vec<PortReport>,
}

#[derive(Debug, Clone)]
pub struct PortReport {
    pub protocol: Protocol,
    pub port: u16,
    pub state: String,
    pub reason: Option<String>,
    pub reason_ttl: Option<String>,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extrainfo: Option<String>,
    pub cpe: Vec<String>,
    pub scripts: Vec<ScriptOutput>,
}

#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub id: String,
    pub output: Option<String>,
    /// `<elem key="...">text</elem>` children.
    pub elems: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub summary: String,
    pub elapsed: f64,
    pub end_time: String,
    pub status: String,
}

impl ScanReport {
    pub fn parse(xml: &str) -> Result<Self, ScanError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();

        let hosts = root
            .children()
            .filter(|n| n.has_tag_name("host"))
            .map(parse_host)
            .collect();

        let summary = root
            .descendants()
            .find(|n| n.has_tag_name("finished"))
            .map(|finished| ScanSummary {
                summary: finished.attribute("summary").unwrap_or_default().to_owned(),
                elapsed: finished
                    .attribute("elapsed")
                    .and_then(|e| e.parse().ok())
                    .unwrap_or_default(),
                end_time: finished.attribute("timestr").unwrap_or_default().to_owned(),
                status: finished.attribute("exit").unwrap_or_default().to_owned(),
            });

        Ok(Self { hosts, summary })
    }

    /// The first scanned host, which is the interesting one for single-target
    /// runs.
    pub fn primary_host(&self) -> Option<&HostReport> {
        self.hosts.first()
    }

    pub fn host_addrs(&self) -> Vec<&str> {
        self.hosts.iter().map(|h| h.addr.as_str()).collect()
    }

    /// All ports reported for the primary host, any state.
    pub fn ports(&self) -> &[PortReport] {
        self.primary_host().map(|h| h.ports.as_slice()).unwrap_or(&[])
    }

    pub fn open_ports(&self) -> Vec<u16> {
        let set: BTreeSet<u16> = self
            .ports()
            .iter()
            .filter(|p| p.state == "open")
            .map(|p| p.port)
            .collect();
        set.into_iter().collect()
    }

    /// Open ports rendered in nmap's `T:...,U:...` input syntax.
    pub fn formatted_open_ports(&self) -> String {
        let mut tcp = BTreeSet::new();
        let mut udp = BTreeSet::new();

        for port in self.ports().iter().filter(|p| p.state == "open") {
            match port.protocol {
                Protocol::Tcp => tcp.insert(port.port),
                Protocol::Udp => udp.insert(port.port),
            };
        }

        let render = |set: &BTreeSet<u16>| {
            set.iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };

        let mut parts = Vec::new();
        if !tcp.is_empty() {
            parts.push(format!("T:{}", render(&tcp)));
        }
        if !udp.is_empty() {
            parts.push(format!("U:{}", render(&udp)));
        }
        parts.join(",")
    }

    /// Open ports of the primary host as persistable [`Service`] rows.
    pub fn services(&self, target_ip: &str) -> Vec<Service> {
        self.ports()
            .iter()
            .filter(|p| p.state == "open")
            .map(|p| Service {
                target_ip: target_ip.to_owned(),
                protocol: p.protocol,
                port: p.port,
                state: p.state.clone(),
                reason: p.reason.clone(),
                name: p.service.clone(),
                product: Some(p.product.clone().unwrap_or_else(|| "unknown".to_owned())),
                version: Some(p.version.clone().unwrap_or_else(|| "unknown".to_owned())),
                extrainfo: Some(p.extrainfo.clone().unwrap_or_else(|| "unknown".to_owned())),
                cpe: p.cpe.clone(),
            })
            .collect()
    }

    /// Best-effort virtual-host hint from the `http-title` script's
    /// `redirect_url` element.
    pub fn vhost_hint(&self) -> Option<String> {
        for port in self.ports() {
            if !matches!(port.service.as_deref(), Some("http") | Some("https")) {
                continue;
            }

            for script in &port.scripts {
                if script.id != "http-title" {
                    continue;
                }

                for (key, text) in &script.elems {
                    if key == "redirect_url" {
                        if let Some(host) = Url::parse(text)
                            .ok()
                            .and_then(|u| u.host_str().map(str::to_owned))
                        {
                            return Some(host);
                        }
                    }
                }
            }
        }

        None
    }
}

fn parse_host(node: roxmltree::Node<'_, '_>) -> HostReport {
    let addr = node
        .children()
        .find(|n| n.has_tag_name("address"))
        .and_then(|n| n.attribute("addr"))
        .unwrap_or_default()
        .to_owned();

    let hostnames = node
        .descendants()
        .filter(|n| n.has_tag_name("hostname"))
        .filter_map(|n| n.attribute("name"))
        .map(str::to_owned)
        .collect();

    let status_node = node.children().find(|n| n.has_tag_name("status"));
    let status = status_node.and_then(|n| n.attribute("state")).map(str::to_owned);
    let reason = status_node.and_then(|n| n.attribute("reason")).map(str::to_owned);

    let ports = node
        .descendants()
        .filter(|n| n.has_tag_name("port"))
        .filter_map(parse_port)
        .collect();

    HostReport {
        addr,
        hostnames,
        status,
        reason,
        ports,
    }
}

fn parse_port(node: roxmltree::Node<'_, '_>) -> Option<PortReport> {
    let protocol = match node.attribute("protocol")? {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        _ => return None,
    };
    let port = node.attribute("portid")?.parse().ok()?;

    let state_node = node.children().find(|n| n.has_tag_name("state"));
    let state = state_node
        .and_then(|n| n.attribute("state"))
        .unwrap_or("unknown")
        .to_owned();
    let reason = state_node.and_then(|n| n.attribute("reason")).map(str::to_owned);
    let reason_ttl = state_node
        .and_then(|n| n.attribute("reason_ttl"))
        .map(str::to_owned);

    let service_node = node.children().find(|n| n.has_tag_name("service"));
    let attr = |name: &str| {
        service_node
            .and_then(|n| n.attribute(name))
            .map(str::to_owned)
    };

    let cpe = service_node
        .map(|n| {
            n.children()
                .filter(|c| c.has_tag_name("cpe"))
                .filter_map(|c| c.text())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let scripts = node
        .children()
        .filter(|n| n.has_tag_name("script"))
        .filter_map(|n| {
            Some(ScriptOutput {
                id: n.attribute("id")?.to_owned(),
                output: n.attribute("output").map(str::to_owned),
                elems: n
                    .children()
                    .filter(|c| c.has_tag_name("elem"))
                    .filter_map(|c| {
                        Some((c.attribute("key")?.to_owned(), c.text()?.to_owned()))
                    })
                    .collect(),
            })
        })
        .collect();

    Some(PortReport {
        protocol,
        port,
        state,
        reason,
        reason_ttl,
        service: attr("name"),
        product: attr("product"),
        version: attr("version"),
        extrainfo: attr("extrainfo"),
        cpe,
        scripts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sS -sV 10.0.0.5" version="7.94">
  <host starttime="1" endtime="2">
    <status state="up" reason="echo-reply"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <hostnames>
      <hostname name="web.example.com" type="PTR"/>
    </hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack" reason_ttl="63"/>
        <service name="ssh" product="OpenSSH" version="9.6">
          <cpe>cpe:/a:openbsd:openssh:9.6</cpe>
        </service>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack" reason_ttl="63"/>
        <service name="http" product="nginx" version="1.24" extrainfo="Ubuntu"/>
        <script id="http-title" output="Did not follow redirect to http://planning.example.com/">
          <elem key="title">Redirecting...</elem>
          <elem key="redirect_url">http://planning.example.com/</elem>
        </script>
      </port>
      <port protocol="tcp" portid="443">
        <state state="closed" reason="reset" reason_ttl="63"/>
      </port>
      <port protocol="udp" portid="53">
        <state state="open" reason="udp-response" reason_ttl="63"/>
        <service name="domain"/>
      </port>
    </ports>
  </host>
  <runstats>
    <finished time="2" timestr="Mon Jun  2 00:17:14 2025" summary="Nmap done at Mon Jun  2 00:17:14 2025; 1 IP address (1 host up) scanned in 0.76 seconds" elapsed="0.76" exit="success"/>
    <hosts up="1" down="0" total="1"/>
  </runstats>
</nmaprun>
"#;

    #[test]
    fn parses_hosts_and_ports() {
        let report = ScanReport::parse(SAMPLE).unwrap();

        assert_eq!(report.host_addrs(), vec!["10.0.0.5"]);
        let host = report.primary_host().unwrap();
        assert_eq!(host.hostnames, vec!["web.example.com".to_owned()]);
        assert_eq!(host.status.as_deref(), Some("up"));
        assert_eq!(host.ports.len(), 4);

        let http = host.ports.iter().find(|p| p.port == 80).unwrap();
        assert_eq!(http.service.as_deref(), Some("http"));
        assert_eq!(http.product.as_deref(), Some("nginx"));
        assert_eq!(http.reason_ttl.as_deref(), Some("63"));
    }

    #[test]
    fn open_ports_exclude_closed_states() {
        let report = ScanReport::parse(SAMPLE).unwrap();

        assert_eq!(report.open_ports(), vec![22, 53, 80]);
        assert_eq!(report.formatted_open_ports(), "T:22,80,U:53");
    }

    #[test]
    fn services_normalize_missing_fields() {
        let report = ScanReport::parse(SAMPLE).unwrap();

        let services = report.services("10.0.0.5");
        assert_eq!(services.len(), 3);

        let ssh = services.iter().find(|s| s.port == 22).unwrap();
        assert_eq!(ssh.cpe, vec!["cpe:/a:openbsd:openssh:9.6".to_owned()]);
        assert_eq!(ssh.extrainfo.as_deref(), Some("unknown"));

        let dns = services.iter().find(|s| s.port == 53).unwrap();
        assert_eq!(dns.protocol, Protocol::Udp);
        assert_eq!(dns.product.as_deref(), Some("unknown"));
    }

    #[test]
    fn vhost_hint_from_http_title_redirect() {
        let report = ScanReport::parse(SAMPLE).unwrap();

        assert_eq!(report.vhost_hint().as_deref(), Some("planning.example.com"));
    }

    #[test]
    fn scan_summary() {
        let report = ScanReport::parse(SAMPLE).unwrap();

        let summary = report.summary.unwrap();
        assert_eq!(summary.status, "success");
        assert!((summary.elapsed - 0.76).abs() < f64::EPSILON);
        assert!(summary.summary.starts_with("Nmap done"));
    }
}
