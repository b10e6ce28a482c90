use super::engine::{DEVICE_INFO_SERVICE, build_queries};
use super::message::{
    DnsMessage, FLAGS_RESPONSE, Question, RecordData, ResourceRecord, classes, types,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;

fn txt(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn response_with(records: Vec<ResourceRecord>) -> DnsMessage {
    DnsMessage {
        flags: FLAGS_RESPONSE,
        answers: records,
        ..DnsMessage::default()
    }
}

#[test]
fn message_round_trip() {
    let message = DnsMessage {
        flags: FLAGS_RESPONSE,
        questions: vec![Question::ptr("_airplay._tcp.local", true)],
        answers: vec![ResourceRecord {
            name: "_airplay._tcp.local".to_string(),
            rtype: types::PTR,
            rclass: classes::IN,
            ttl: 4500,
            data: RecordData::Ptr("Living Room._airplay._tcp.local".to_string()),
        }],
        additionals: vec![
            ResourceRecord {
                name: "Living Room._airplay._tcp.local".to_string(),
                rtype: types::SRV,
                rclass: classes::CACHE_FLUSH,
                ttl: 120,
                data: RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 7000,
                    target: "Living-Room.local".to_string(),
                },
            },
            ResourceRecord {
                name: "Living Room._airplay._tcp.local".to_string(),
                rtype: types::TXT,
                rclass: classes::CACHE_FLUSH,
                ttl: 4500,
                data: RecordData::Txt(txt(&[("deviceid", "AA:BB:CC:DD:EE:FF")])),
            },
            ResourceRecord {
                name: "Living-Room.local".to_string(),
                rtype: types::A,
                rclass: classes::CACHE_FLUSH,
                ttl: 120,
                data: RecordData::A(Ipv4Addr::new(10, 0, 10, 20)),
            },
        ],
        ..DnsMessage::default()
    };

    let decoded = DnsMessage::decode(&message.encode()).unwrap();
    assert_eq!(decoded.flags, FLAGS_RESPONSE);
    assert_eq!(decoded.questions, message.questions);
    assert_eq!(decoded.answers, message.answers);
    assert_eq!(decoded.additionals, message.additionals);
}

#[test]
fn decode_handles_compression_pointers() {
    // Hand-built response: question name, answer uses a pointer to it
    let mut data = vec![
        0x00, 0x00, // id
        0x84, 0x00, // flags
        0x00, 0x01, // qd
        0x00, 0x01, // an
        0x00, 0x00, 0x00, 0x00, // ns, ar
    ];
    // Question: _raop._tcp.local PTR IN
    for label in ["_raop", "_tcp", "local"] {
        data.push(u8::try_from(label.len()).unwrap());
        data.extend_from_slice(label.as_bytes());
    }
    data.push(0);
    data.extend_from_slice(&types::PTR.to_be_bytes());
    data.extend_from_slice(&classes::IN.to_be_bytes());

    // Answer name: pointer to offset 12 (the question name)
    data.extend_from_slice(&[0xC0, 0x0C]);
    data.extend_from_slice(&types::PTR.to_be_bytes());
    data.extend_from_slice(&classes::IN.to_be_bytes());
    data.extend_from_slice(&120u32.to_be_bytes());
    // RDATA: "unit" + pointer back to the question name
    let rdata_len = 1 + 4 + 2;
    data.extend_from_slice(&u16::try_from(rdata_len).unwrap().to_be_bytes());
    data.push(4);
    data.extend_from_slice(b"unit");
    data.extend_from_slice(&[0xC0, 0x0C]);

    let message = DnsMessage::decode(&data).unwrap();
    assert_eq!(message.answers.len(), 1);
    assert_eq!(message.answers[0].name, "_raop._tcp.local");
    assert_eq!(
        message.answers[0].data,
        RecordData::Ptr("unit._raop._tcp.local".to_string())
    );
}

#[test]
fn decode_rejects_pointer_loop() {
    let mut data = vec![
        0x00, 0x00, 0x84, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
    ];
    // Answer name pointing at itself
    data.extend_from_slice(&[0xC0, 0x0C]);
    assert!(DnsMessage::decode(&data).is_err());
}

#[test]
fn queries_include_device_info_and_qu_bit() {
    let queries = build_queries(&["_airplay._tcp.local".to_string()]);
    assert_eq!(queries.len(), 1);
    let names: Vec<&str> = queries[0]
        .questions
        .iter()
        .map(|q| q.name.as_str())
        .collect();
    assert!(names.contains(&"_airplay._tcp.local"));
    assert!(names.contains(&DEVICE_INFO_SERVICE));
    assert!(queries[0].questions.iter().all(|q| q.unicast_response));
}

#[test]
fn oversized_requests_split_between_packets() {
    // Enough long service names to overflow one packet
    let services: Vec<String> = (0..60)
        .map(|i| format!("_very-long-service-name-padding-{i:02}._tcp.local"))
        .collect();
    let queries = build_queries(&services);
    assert!(queries.len() > 1);
    for query in &queries {
        assert!(query.encode().len() <= 1200);
        assert!(!query.questions.is_empty());
    }
    let total: usize = queries.iter().map(|q| q.questions.len()).sum();
    assert_eq!(total, services.len() + 1);
}

mod aggregation {
    use super::super::engine::HostResponse;
    use super::*;
    use std::net::{IpAddr, SocketAddr};

    /// Feed encoded packets through the aggregation path, as the scan
    /// loops do for packets arriving from one source.
    async fn scan_against(packets: Vec<DnsMessage>) -> Vec<HostResponse> {
        let mut aggregates = HashMap::new();
        let source: SocketAddr = (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 5353).into();
        let mut out = Vec::new();
        for packet in packets {
            if let Some(response) =
                super::super::engine::test_support::feed(&packet.encode(), source, &mut aggregates)
            {
                out.push(response);
            }
        }
        out
    }

    fn airplay_packet() -> DnsMessage {
        response_with(vec![
            ResourceRecord {
                name: "_airplay._tcp.local".to_string(),
                rtype: types::PTR,
                rclass: classes::IN,
                ttl: 4500,
                data: RecordData::Ptr("Stue._airplay._tcp.local".to_string()),
            },
            ResourceRecord {
                name: "Stue._airplay._tcp.local".to_string(),
                rtype: types::SRV,
                rclass: classes::CACHE_FLUSH,
                ttl: 120,
                data: RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 7000,
                    target: "Stue.local".to_string(),
                },
            },
            ResourceRecord {
                name: "Stue.local".to_string(),
                rtype: types::A,
                rclass: classes::CACHE_FLUSH,
                ttl: 120,
                data: RecordData::A(Ipv4Addr::new(10, 0, 0, 9)),
            },
        ])
    }

    #[tokio::test]
    async fn merges_split_responses() {
        let txt_packet = response_with(vec![ResourceRecord {
            name: "Stue._airplay._tcp.local".to_string(),
            rtype: types::TXT,
            rclass: classes::CACHE_FLUSH,
            ttl: 4500,
            data: RecordData::Txt(txt(&[("deviceid", "AA:BB:CC:DD:EE:FF")])),
        }]);

        let responses = scan_against(vec![airplay_packet(), txt_packet]).await;
        let last = responses.last().unwrap();
        assert_eq!(last.services.len(), 1);
        let service = &last.services[0];
        assert_eq!(service.service_type, "_airplay._tcp.local");
        assert_eq!(service.name, "Stue");
        assert_eq!(service.port, 7000);
        assert_eq!(
            service.properties.get("deviceid").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
    }

    #[tokio::test]
    async fn goodbye_removes_service() {
        let goodbye = response_with(vec![ResourceRecord {
            name: "_airplay._tcp.local".to_string(),
            rtype: types::PTR,
            rclass: classes::IN,
            ttl: 0,
            data: RecordData::Ptr("Stue._airplay._tcp.local".to_string()),
        }]);

        let responses = scan_against(vec![airplay_packet(), goodbye]).await;
        assert!(responses.last().unwrap().services.is_empty());
    }

    #[tokio::test]
    async fn sleep_proxy_marks_deep_sleep() {
        let proxy_packet = response_with(vec![
            ResourceRecord {
                name: "_sleep-proxy._udp.local".to_string(),
                rtype: types::PTR,
                rclass: classes::IN,
                ttl: 4500,
                data: RecordData::Ptr("70-35-60-63.1 proxy._sleep-proxy._udp.local".to_string()),
            },
            ResourceRecord {
                name: "Sleeping.local".to_string(),
                rtype: types::A,
                rclass: classes::CACHE_FLUSH,
                ttl: 0,
                data: RecordData::A(Ipv4Addr::new(10, 0, 0, 77)),
            },
        ]);

        let responses = scan_against(vec![airplay_packet(), proxy_packet]).await;
        assert!(responses.last().unwrap().deep_sleep);
    }

    #[tokio::test]
    async fn device_info_model_is_surfaced() {
        let info_packet = response_with(vec![ResourceRecord {
            name: "Stue._device-info._tcp.local".to_string(),
            rtype: types::TXT,
            rclass: classes::CACHE_FLUSH,
            ttl: 4500,
            data: RecordData::Txt(txt(&[("model", "AppleTV6,2")])),
        }]);

        let responses = scan_against(vec![airplay_packet(), info_packet]).await;
        assert_eq!(
            responses.last().unwrap().model.as_deref(),
            Some("AppleTV6,2")
        );
    }
}
