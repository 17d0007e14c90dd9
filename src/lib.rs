#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod admission;
pub mod create;
pub mod crypto;
pub mod packet;
pub mod request;
pub mod time;
pub mod transport;
pub mod types;

#[cfg(feature = "std")]
pub mod handlers;
#[cfg(feature = "std")]
pub mod notify;
#[cfg(feature = "std")]
pub mod reqs;
#[cfg(feature = "std")]
pub mod router;
#[cfg(feature = "std")]
pub mod store;

pub use time::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use crate::crypto::kdf::{self, PROTO_COLIBRI};
    use crate::crypto::mac::MacKey;
    use crate::packet::info::Info;
    use crate::packet::sof::SofField;
    use crate::packet::{Block, Ephemeral, Steady};
    use crate::types::*;

    fn hop_sv(i: usize) -> MacKey {
        MacKey([(i as u8) + 1; 32])
    }

    fn hop_as(i: usize) -> AsId {
        AsId(0x0001_ff00_0000_0100 + i as u64)
    }

    // End-to-end token flow over a stitched two-steady path: each AS
    // issues a sealed field, the source opens all of them, binds a data
    // packet, and every AS independently verifies its hop.
    #[test]
    fn e2e_stitched_issue_reserve_and_verify() {
        let source = AsId(0x0001_ff00_0000_0099);
        let source_host = HostAddr::V4([10, 0, 0, 1]);
        let ids = alloc::vec![
            ResvId::Ephemeral([0xe1; 16]),
            ResvId::Steady([0xa1; 10]),
            ResvId::Steady([0xa2; 10]),
        ];
        let path_lens = [3u8, 2, 0];
        let total_hops = 4usize;
        let info = Info {
            exp_tick: Tick(2_000),
            bw_cls: BwCls(5),
            rlc: Rlc(3),
            index: Index(0),
            path_type: PathType::Ephemeral,
            fail_hop: 0,
        };
        // admission walk: every AS seals its hop authenticator with the
        // key it shares with the source and the packet-bound nonce
        let nonce = crate::crypto::seal::nonce(1234, &[5, 6, 7, 8], &[0, 0, 0, 0]);
        let mut block = Block::new_control(info, total_hops);
        for i in 0..total_hops {
            block.sofs[i].ingress = IfId(10 + i as u16);
            block.sofs[i].egress = IfId(20 + i as u16);
            let l1 = kdf::derive_l1(hop_as(i), source);
            let key = kdf::derive_l2(&l1, Some(&source_host), None, PROTO_COLIBRI);
            let mut sv = hop_sv(i);
            block
                .set_ha(&mut sv, &key, &nonce, hop_as(i), i, &ids, &path_lens)
                .expect("issue sof");
        }
        // the source opens the returned block into reservation form
        let ephem = crate::create::new_ephem_use(
            ids.clone(),
            path_lens,
            block,
            true,
            source,
            &source_host,
            &nonce,
        )
        .expect("promote block");
        // bind a data packet
        let mut extn = ephem;
        let payload = b"data packet payload";
        let e2e = kdf::end_to_end_hash_key(
            PROTO_COLIBRI,
            source,
            hop_as(3),
            &source_host,
            &HostAddr::V4([10, 0, 0, 2]),
        );
        let now = 1_997 * TICK_NANOS;
        extn.write_source(Some(&e2e), payload, now).expect("write source");
        // every AS verifies its own hop with only its secret value
        for i in 0..total_hops {
            let mut sv = hop_sv(i);
            extn.active_blocks[0]
                .verify(
                    &mut sv,
                    i,
                    &ids,
                    &path_lens,
                    &extn.pld_hash,
                    extn.time_stamp,
                    now,
                )
                .expect("hop verifies");
        }
        // a flipped payload-hash bit breaks the hop verification
        let mut tampered = extn.pld_hash;
        tampered[0] ^= 1;
        let mut sv = hop_sv(0);
        assert_eq!(
            extn.active_blocks[0].verify(
                &mut sv,
                0,
                &ids,
                &path_lens,
                &tampered,
                extn.time_stamp,
                now
            ),
            Err(Error::BadHvf)
        );
    }

    // Wire round trips across the whole extension family.
    #[test]
    fn extension_family_round_trips() {
        let info = Info {
            exp_tick: Tick(800),
            bw_cls: BwCls(6),
            rlc: Rlc(4),
            index: Index(2),
            path_type: PathType::Up,
            fail_hop: 0,
        };
        let block = Block {
            info,
            sofs: (0..2)
                .map(|i| SofField::new_data(IfId(i), IfId(i + 1)))
                .collect(),
        };
        let steady = crate::create::new_steady_use(
            &[ResvId::Steady([7u8; 10])],
            alloc::vec![block.clone()],
            true,
        )
        .expect("steady use");
        let raw = steady.pack();
        assert_eq!(Steady::from_raw(&raw).expect("parse steady"), steady);

        let mut einfo = info;
        einfo.path_type = PathType::Ephemeral;
        let eblock = Block {
            info: einfo,
            sofs: (0..3)
                .map(|i| SofField::new_data(IfId(i), IfId(i + 1)))
                .collect(),
        };
        let mut base = steady.base.clone();
        base.steady = false;
        base.setup = false;
        base.total_hops = 3;
        base.total_steady = 2;
        base.path_lens = [2, 2, 0];
        base.ids = alloc::vec![
            ResvId::Ephemeral([1u8; 16]),
            ResvId::Steady([2u8; 10]),
            ResvId::Steady([3u8; 10]),
        ];
        base.active_blocks = alloc::vec![eblock];
        base.dvf = [4, 3, 2, 1];
        let ephem = Ephemeral { base };
        let raw = ephem.pack();
        assert_eq!(Ephemeral::from_raw(&raw).expect("parse ephem"), ephem);
    }
}
