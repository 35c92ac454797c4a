use epochnet_codec::{from_slice, from_slice_with_limits, to_vec, Limits};
use epochnet_network::protocol::{
    Address, Block, BlockHeader, CheckpointBeacon, Command, Hash, InvType, InvVector, IpAddress,
    LeadershipProof, Message, Secp256k1Signature, Signature, Transaction, Version,
};
use proptest::{collection::vec, prelude::*};

fn hash() -> impl Strategy<Value = Hash> {
    any::<[u8; 32]>().prop_map(Hash::Sha256)
}

fn address() -> impl Strategy<Value = Address> {
    let ip = prop_oneof![
        any::<u32>().prop_map(IpAddress::V4),
        any::<[u32; 4]>().prop_map(IpAddress::V6),
    ];

    (ip, any::<u16>()).prop_map(|(ip, port)| Address { ip, port })
}

fn inv_vector() -> impl Strategy<Value = InvVector> {
    let inv_type = prop_oneof![
        Just(InvType::Error),
        Just(InvType::Tx),
        Just(InvType::Block),
        Just(InvType::DataRequest),
        Just(InvType::DataResult),
    ];

    (inv_type, hash()).prop_map(|(inv_type, hash)| InvVector { inv_type, hash })
}

fn beacon() -> impl Strategy<Value = CheckpointBeacon> {
    (any::<u32>(), hash()).prop_map(|(checkpoint, hash_prev_block)| CheckpointBeacon {
        checkpoint,
        hash_prev_block,
    })
}

prop_compose! {
    fn block()(
        version in any::<u32>(),
        beacon in beacon(),
        hash_merkle_root in hash(),
        r in vec(any::<u8>(), 0..40),
        s in vec(any::<u8>(), 0..40),
        influence in any::<u64>(),
        txns in vec(vec(any::<u8>(), 0..64), 0..8),
    ) -> Block {
        Block {
            header: BlockHeader {
                version,
                beacon,
                hash_merkle_root,
                proof: LeadershipProof {
                    block_sig: Signature::Secp256k1(Secp256k1Signature {
                        r: r.into(),
                        s: s.into(),
                    }),
                    influence,
                },
            },
            txns: txns.into_iter().map(|x| Transaction(x.into())).collect(),
        }
    }
}

prop_compose! {
    fn version()(
        version in any::<u32>(),
        timestamp in any::<i64>(),
        capabilities in any::<u64>(),
        sender_address in address(),
        receiver_address in address(),
        user_agent in ".{0,32}",
        last_epoch in any::<u32>(),
        genesis in hash(),
        nonce in any::<u64>(),
    ) -> Version {
        Version {
            version,
            timestamp,
            capabilities,
            sender_address,
            receiver_address,
            user_agent,
            last_epoch,
            genesis,
            nonce,
        }
    }
}

fn command() -> impl Strategy<Value = Command> {
    prop_oneof![
        version().prop_map(Command::Version),
        Just(Command::Verack),
        Just(Command::GetPeers),
        vec(address(), 0..16).prop_map(Command::Peers),
        any::<u64>().prop_map(Command::Ping),
        any::<u64>().prop_map(Command::Pong),
        block().prop_map(Command::Block),
        vec(inv_vector(), 0..16).prop_map(Command::Inv),
        vec(inv_vector(), 0..16).prop_map(Command::GetData),
        beacon().prop_map(Command::GetBlocks),
    ]
}

fn message() -> impl Strategy<Value = Message> {
    (any::<u16>(), command()).prop_map(|(magic, command)| Message::new(magic, command))
}

fn tight_limits() -> Limits {
    Limits {
        max_message_bytes: 1024,
        max_sequence_len: 16,
        max_depth: 8,
    }
}

proptest! {
    #[test]
    fn every_message_survives_the_wire(msg in message()) {
        let bytes = to_vec(&msg);
        let decoded: Message = from_slice(&bytes).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn arbitrary_bytes_never_panic(input in vec(any::<u8>(), 0..1200)) {
        let _ = from_slice_with_limits::<Message>(&input, tight_limits());
        let _ = from_slice_with_limits::<Message>(&input, Limits::default());
    }

    #[test]
    fn corrupted_messages_never_panic(
        msg in message(),
        flips in vec((any::<prop::sample::Index>(), any::<u8>()), 1..8),
    ) {
        let mut bytes = to_vec(&msg);

        for (index, value) in flips {
            let at = index.index(bytes.len());
            bytes[at] = value;
        }

        let _ = from_slice_with_limits::<Message>(&bytes, tight_limits());
    }

    #[test]
    fn truncated_messages_are_rejected(msg in message(), cut in any::<prop::sample::Index>()) {
        let bytes = to_vec(&msg);
        let at = cut.index(bytes.len());

        prop_assert!(from_slice::<Message>(&bytes[..at]).is_err());
    }
}
