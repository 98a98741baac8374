use std::net::Ipv4Addr;
use std::time::Instant;

use bytes::BufMut;
use log::debug;

use bencode::{BencodeDict, BencodeList, Value};

use crate::peer::PeerId;
use crate::seeder::Seeder;
use crate::tracker::http::{parse_query_string, HttpRequest, HttpResponse, QueryVars};
use crate::tracker::{PeerInfo, Tracker, TrackerEvent};
use crate::util::Sha1;

const DEFAULT_NUMWANT: i64 = 50;

/// Addresses of the HTTP connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct Origin {
    pub remote: Ipv4Addr,
    pub local: Ipv4Addr,
}

fn hash_param(vars: &QueryVars, name: &str) -> Option<[u8; 20]> {
    vars.get(name).and_then(|value| value.try_into().ok())
}

fn int_param(vars: &QueryVars, name: &str) -> Option<i64> {
    vars.get_str(name).and_then(|value| value.parse().ok())
}

impl Tracker {
    pub fn handle_request(
        &mut self,
        request: &HttpRequest,
        seeder: &Seeder,
        origin: Origin,
    ) -> HttpResponse {
        debug!(
            "{} {} {} from {}",
            request.method, request.location, request.query, origin.remote
        );
        match request.location.as_str() {
            "/announce" => self.announce(request, seeder, origin),
            "/scrape" => self.scrape(request, seeder),
            _ => HttpResponse::not_found(),
        }
    }

    fn announce(&mut self, request: &HttpRequest, seeder: &Seeder, origin: Origin) -> HttpResponse {
        let vars = parse_query_string(&request.query);
        let (Some(info_hash), Some(peer_id)) =
            (hash_param(&vars, "info_hash"), hash_param(&vars, "peer_id"))
        else {
            return HttpResponse::bad_request();
        };
        let numwant = match vars.get("numwant") {
            None => DEFAULT_NUMWANT,
            Some(_) => match int_param(&vars, "numwant") {
                Some(n) if n >= 0 => n,
                _ => return HttpResponse::bad_request(),
            },
        };
        let port = int_param(&vars, "port")
            .filter(|port| (1..=65535).contains(port))
            .unwrap_or(0) as u16;

        if !seeder.has_meta_info(&info_hash) {
            return HttpResponse::forbidden();
        }

        let event: Option<TrackerEvent> = vars.get_str("event").and_then(|e| e.parse().ok());
        if let Some(event) = event {
            debug!("Peer {} {event} {}", origin.remote, hex::encode(info_hash));
        }
        let peer = PeerInfo {
            info_hash,
            peer_id: PeerId::new(peer_id),
            ip: origin.remote,
            port,
            uploaded: int_param(&vars, "uploaded").unwrap_or(0),
            downloaded: int_param(&vars, "downloaded").unwrap_or(0),
            left: int_param(&vars, "left").unwrap_or(0),
            last_seen: Instant::now(),
        };
        let stopped = port == 0 || event == Some(TrackerEvent::Stopped);
        let requester = peer.peer_id;
        self.store(peer, stopped);

        let compact = vars.get("compact") == Some(b"1".as_slice());
        let interval = self.settings.update_interval.as_secs() as i64;
        let count = usize::try_from(numwant).unwrap_or(usize::MAX);
        let peers = self.list(&requester, &info_hash, count);

        let addresses = peers.iter().map(|peer| {
            let ip = if peer.ip.is_unspecified() {
                origin.local
            } else {
                peer.ip
            };
            (peer, ip)
        });
        let peers = if compact {
            let mut buf = Vec::with_capacity(6 * peers.len());
            for (peer, ip) in addresses {
                buf.put_slice(&ip.octets());
                buf.put_u16(peer.port);
            }
            Value::from(buf)
        } else {
            let list: BencodeList = addresses
                .map(|(peer, ip)| {
                    Value::Dict(BencodeDict::from([
                        (b"peer id".to_vec(), peer.peer_id.as_slice().into()),
                        (b"ip".to_vec(), ip.to_string().into()),
                        (b"port".to_vec(), i64::from(peer.port).into()),
                    ]))
                })
                .collect();
            Value::from(list)
        };

        let reply = Value::Dict(BencodeDict::from([
            (b"interval".to_vec(), interval.into()),
            (b"peers".to_vec(), peers),
        ]));
        HttpResponse::ok(bencode::into_vec(&reply))
    }

    fn scrape(&self, request: &HttpRequest, seeder: &Seeder) -> HttpResponse {
        let vars = parse_query_string(&request.query);
        let wanted: Vec<&[u8]> = vars.get_all("info_hash").collect();

        let mut files = BencodeDict::new();
        for (info_hash, peers) in self.torrents() {
            if !wanted.is_empty() && !wanted.contains(&info_hash.as_slice()) {
                continue;
            }
            files.insert(info_hash.to_vec(), scrape_entry(info_hash, peers, seeder));
        }
        let reply = Value::Dict(BencodeDict::from([(b"files".to_vec(), files.into())]));
        HttpResponse::ok(bencode::into_vec(&reply))
    }
}

fn scrape_entry<'a>(
    info_hash: &Sha1,
    peers: impl IntoIterator<Item = &'a PeerInfo>,
    seeder: &Seeder,
) -> Value {
    let (mut complete, mut incomplete) = (0i64, 0i64);
    for peer in peers {
        if peer.left == 0 {
            complete += 1;
        } else if peer.left > 0 {
            incomplete += 1;
        }
    }
    let mut entry = BencodeDict::from([
        (b"complete".to_vec(), complete.into()),
        (b"incomplete".to_vec(), incomplete.into()),
        (b"downloaded".to_vec(), 0i64.into()),
    ]);
    if let Some(info) = seeder.get_meta_info(info_hash) {
        entry.insert(b"name".to_vec(), info.name().into());
    }
    Value::Dict(entry)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use percent_encoding::{percent_encode, NON_ALPHANUMERIC};

    use bencode::Value;

    use crate::file::MetaInfo;
    use crate::peer::PeerId;
    use crate::seeder::Seeder;
    use crate::tracker::announce::Origin;
    use crate::tracker::http::{parse_request, HttpResponse};
    use crate::tracker::{Tracker, TrackerSettings};

    struct Fixture {
        _dir: tempfile::TempDir,
        tracker: Tracker,
        seeder: Seeder,
        info_hash: [u8; 20],
    }

    const ORIGIN: Origin = Origin {
        remote: Ipv4Addr::new(10, 1, 2, 3),
        local: Ipv4Addr::new(10, 9, 9, 9),
    };

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie");
        fs::write(&path, vec![0u8; 100]).unwrap();
        let info = Arc::new(MetaInfo::generate(&path, "http://host/announce", 64).unwrap());
        let mut seeder = Seeder::new(PeerId::new([0xaa; 20]), 6881);
        let info_hash = *info.info_hash();
        seeder.add_torrent(info);
        let tracker = Tracker::new(
            PeerId::new([0xaa; 20]),
            Ipv4Addr::UNSPECIFIED,
            6881,
            TrackerSettings::default(),
        );
        Fixture {
            _dir: dir,
            tracker,
            seeder,
            info_hash,
        }
    }

    fn enc(bytes: &[u8]) -> String {
        percent_encode(bytes, NON_ALPHANUMERIC).to_string()
    }

    fn get(fixture: &mut Fixture, uri: &str) -> HttpResponse {
        let request = parse_request(&format!("GET {uri} HTTP/1.0")).unwrap();
        fixture
            .tracker
            .handle_request(&request, &fixture.seeder, ORIGIN)
    }

    fn body(response: &HttpResponse) -> Value {
        assert_eq!(response.status, 200);
        bencode::from_slice(&response.body).unwrap()
    }

    #[test]
    fn short_info_hash_is_bad_request() {
        let mut fixture = fixture();
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=1",
            enc(&[1; 19]),
            enc(&[2; 20])
        );
        assert_eq!(get(&mut fixture, &uri).status, 400);
    }

    #[test]
    fn unknown_info_hash_is_forbidden() {
        let mut fixture = fixture();
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=1",
            enc(&[1; 20]),
            enc(&[2; 20])
        );
        assert_eq!(get(&mut fixture, &uri).status, 403);
    }

    #[test]
    fn bad_numwant_is_rejected() {
        let mut fixture = fixture();
        for numwant in ["-1", "many", ""] {
            let uri = format!(
                "/announce?info_hash={}&peer_id={}&port=1&numwant={numwant}",
                enc(&fixture.info_hash),
                enc(&[2; 20])
            );
            assert_eq!(get(&mut fixture, &uri).status, 400, "{numwant}");
        }
    }

    #[test]
    fn other_paths_are_not_found() {
        let mut fixture = fixture();
        assert_eq!(get(&mut fixture, "/").status, 404);
        assert_eq!(get(&mut fixture, "/announce/x").status, 404);
    }

    #[test]
    fn compact_announce() {
        let mut fixture = fixture();
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=5000&left=10&compact=1",
            enc(&fixture.info_hash),
            enc(&[2; 20])
        );
        let reply = body(&get(&mut fixture, &uri));
        assert_eq!(reply.get(b"interval").and_then(Value::as_int), Some(90));
        // Only the local peer, advertised on the address the request came in on.
        assert_eq!(
            reply.get(b"peers").and_then(Value::as_bytes),
            Some(&[10, 9, 9, 9, 0x1a, 0xe1][..])
        );

        // A second peer sees the first.
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=5001&compact=1",
            enc(&fixture.info_hash),
            enc(&[3; 20])
        );
        let reply = body(&get(&mut fixture, &uri));
        let peers = reply.get(b"peers").and_then(Value::as_bytes).unwrap();
        assert_eq!(peers.len(), 12);
        assert!(peers
            .chunks(6)
            .any(|chunk| chunk == [10, 1, 2, 3, 0x13, 0x88]));
    }

    #[test]
    fn full_announce_lists_dicts() {
        let mut fixture = fixture();
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=5000",
            enc(&fixture.info_hash),
            enc(&[2; 20])
        );
        get(&mut fixture, &uri);
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=5001&numwant=10",
            enc(&fixture.info_hash),
            enc(&[3; 20])
        );
        let reply = body(&get(&mut fixture, &uri));
        let peers = reply.get(b"peers").and_then(Value::as_list).unwrap();
        assert_eq!(peers.len(), 2);
        let first = peers
            .iter()
            .find(|peer| peer.get(b"peer id").and_then(Value::as_bytes) == Some(&[2; 20][..]))
            .unwrap();
        assert_eq!(first.get(b"ip").and_then(Value::as_bytes), Some(&b"10.1.2.3"[..]));
        assert_eq!(first.get(b"port").and_then(Value::as_int), Some(5000));
    }

    #[test]
    fn stopped_and_portless_peers_are_not_stored() {
        let mut fixture = fixture();
        for query in ["port=5000&event=stopped", "port=0", "port=70000", "port=abc"] {
            let uri = format!(
                "/announce?info_hash={}&peer_id={}&{query}",
                enc(&fixture.info_hash),
                enc(&[2; 20])
            );
            assert_eq!(get(&mut fixture, &uri).status, 200);
        }
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=5001",
            enc(&fixture.info_hash),
            enc(&[3; 20])
        );
        let reply = body(&get(&mut fixture, &uri));
        assert_eq!(reply.get(b"peers").and_then(Value::as_list).unwrap().len(), 1);
    }

    #[test]
    fn numwant_zero_returns_no_peers() {
        let mut fixture = fixture();
        let uri = format!(
            "/announce?info_hash={}&peer_id={}&port=5000&numwant=0&compact=1",
            enc(&fixture.info_hash),
            enc(&[2; 20])
        );
        let reply = body(&get(&mut fixture, &uri));
        assert_eq!(reply.get(b"peers").and_then(Value::as_bytes), Some(&[][..]));
    }

    #[test]
    fn scrape_counts_seeders_and_leechers() {
        let mut fixture = fixture();
        for (id, left) in [(2u8, 0), (3, 0), (4, 50)] {
            let uri = format!(
                "/announce?info_hash={}&peer_id={}&port=5000&left={left}",
                enc(&fixture.info_hash),
                enc(&[id; 20])
            );
            get(&mut fixture, &uri);
        }

        let reply = body(&get(&mut fixture, "/scrape"));
        let files = reply.get(b"files").unwrap();
        let entry = files.get(&fixture.info_hash).unwrap();
        assert_eq!(entry.get(b"complete").and_then(Value::as_int), Some(2));
        assert_eq!(entry.get(b"incomplete").and_then(Value::as_int), Some(1));
        assert_eq!(entry.get(b"downloaded").and_then(Value::as_int), Some(0));
        assert_eq!(entry.get(b"name").and_then(Value::as_bytes), Some(&b"movie"[..]));

        let uri = format!("/scrape?info_hash={}", enc(&[7; 20]));
        let reply = body(&get(&mut fixture, &uri));
        assert_eq!(
            reply.get(b"files").and_then(Value::as_dict).map(|d| d.len()),
            Some(0)
        );
    }
}
