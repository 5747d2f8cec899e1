//! Contract ABI definitions and decoding into core types

use alloy_primitives::{hex, Bytes, B256};
use alloy_sol_types::{sol, SolCall, SolEvent};

use mirror_core::{HistoryPoint, PriceSample, PriceUpdateEvent, ReadError, ReadResult};

use crate::transport::RawLog;

sol! {
    /// Shared by the origin aggregator and the destination price store
    function latestRoundData() external view returns (
        uint80 roundId,
        int256 answer,
        uint256 startedAt,
        uint256 updatedAt,
        uint80 answeredInRound
    );

    /// Emitted by the destination store on every mirrored round
    event PriceUpdated(uint80 indexed roundId, int256 oldPrice, int256 newPrice, uint256 updatedAt);

    /// Emitted by a Chainlink-style aggregator on every new answer
    event AnswerUpdated(int256 indexed current, uint256 indexed roundId, uint256 updatedAt);
}

pub fn price_updated_topic() -> B256 {
    PriceUpdated::SIGNATURE_HASH
}

pub fn answer_updated_topic() -> B256 {
    AnswerUpdated::SIGNATURE_HASH
}

pub fn encode_latest_round_data() -> Bytes {
    Bytes::from(latestRoundDataCall {}.abi_encode())
}

pub fn decode_latest_round_data(data: &[u8]) -> ReadResult<PriceSample> {
    if data.is_empty() {
        // eth_call against an address without code returns 0x
        return Err(ReadError::Contract(
            "empty return data from latestRoundData".to_string(),
        ));
    }

    let ret = latestRoundDataCall::abi_decode_returns(data, true)
        .map_err(|e| ReadError::MalformedResponse(format!("latestRoundData: {e}")))?;

    Ok(PriceSample {
        price: to_i128(ret.answer, "answer")?,
        round_id: to_u128(ret.roundId, "roundId")?,
        started_at: to_u64(ret.startedAt, "startedAt")?,
        updated_at: to_u64(ret.updatedAt, "updatedAt")?,
        answered_in_round: to_u128(ret.answeredInRound, "answeredInRound")?,
    })
}

pub fn decode_price_updated(log: &RawLog) -> ReadResult<PriceUpdateEvent> {
    expect_topic(log, PriceUpdated::SIGNATURE_HASH, "PriceUpdated")?;
    let event = PriceUpdated::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| ReadError::MalformedResponse(format!("PriceUpdated: {e}")))?;

    Ok(PriceUpdateEvent {
        old_price: to_i128(event.oldPrice, "oldPrice")?,
        new_price: to_i128(event.newPrice, "newPrice")?,
        round_id: to_u128(event.roundId, "roundId")?,
        updated_at: to_u64(event.updatedAt, "updatedAt")?,
        block_number: log.block_number.unwrap_or_default(),
        transaction_hash: log.transaction_hash.map(hex::encode_prefixed),
    })
}

pub fn decode_answer_updated(log: &RawLog) -> ReadResult<HistoryPoint> {
    expect_topic(log, AnswerUpdated::SIGNATURE_HASH, "AnswerUpdated")?;
    let event = AnswerUpdated::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| ReadError::MalformedResponse(format!("AnswerUpdated: {e}")))?;

    Ok(HistoryPoint {
        timestamp: to_u64(event.updatedAt, "updatedAt")?,
        price: to_i128(event.current, "current")?,
        round_id: to_u128(event.roundId, "roundId")?,
    })
}

// decode_raw_log does not check the event selector
fn expect_topic(log: &RawLog, signature: B256, name: &str) -> ReadResult<()> {
    match log.topics.first() {
        Some(topic) if *topic == signature => Ok(()),
        Some(topic) => Err(ReadError::MalformedResponse(format!(
            "{name}: unexpected topic0 {topic}"
        ))),
        None => Err(ReadError::MalformedResponse(format!("{name}: log has no topics"))),
    }
}

fn to_i128<T>(value: T, field: &str) -> ReadResult<i128>
where
    i128: TryFrom<T>,
{
    i128::try_from(value)
        .map_err(|_| ReadError::MalformedResponse(format!("{field} out of range")))
}

fn to_u128<T>(value: T, field: &str) -> ReadResult<u128>
where
    u128: TryFrom<T>,
{
    u128::try_from(value)
        .map_err(|_| ReadError::MalformedResponse(format!("{field} out of range")))
}

fn to_u64<T>(value: T, field: &str) -> ReadResult<u64>
where
    u64: TryFrom<T>,
{
    u64::try_from(value)
        .map_err(|_| ReadError::MalformedResponse(format!("{field} out of range")))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_selector() {
        // keccak256("latestRoundData()")[..4]
        assert_eq!(&encode_latest_round_data()[..], &[0xfe, 0xaf, 0x96, 0x8c]);
    }

    #[test]
    fn test_decode_round_data() {
        let data = round_data(42, 200_000_000_000, 990, 1_000);
        let sample = decode_latest_round_data(&data).unwrap();
        assert_eq!(sample.round_id, 42);
        assert_eq!(sample.price, 200_000_000_000);
        assert_eq!(sample.started_at, 990);
        assert_eq!(sample.updated_at, 1_000);
        assert_eq!(sample.answered_in_round, 42);
    }

    #[test]
    fn test_decode_negative_answer() {
        let data = round_data(1, -5, 0, 0);
        assert_eq!(decode_latest_round_data(&data).unwrap().price, -5);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_latest_round_data(&[]),
            Err(ReadError::Contract(_))
        ));
        assert!(matches!(
            decode_latest_round_data(&[0u8; 40]),
            Err(ReadError::MalformedResponse(_))
        ));

        // updatedAt beyond u64
        let mut data = round_data(1, 1, 1, 1);
        data[96 + 8] = 0x01;
        assert!(matches!(
            decode_latest_round_data(&data),
            Err(ReadError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_decode_price_updated() {
        let log = price_updated_log(7, 100, 200, 1_234, 55, Some(0xab));
        let event = decode_price_updated(&log).unwrap();
        assert_eq!(event.round_id, 7);
        assert_eq!(event.old_price, 100);
        assert_eq!(event.new_price, 200);
        assert_eq!(event.updated_at, 1_234);
        assert_eq!(event.block_number, 55);
        assert_eq!(
            event.transaction_hash.as_deref(),
            Some("0xabababababababababababababababababababababababababababababababab")
        );
    }

    #[test]
    fn test_decode_wrong_topic() {
        let mut log = price_updated_log(7, 100, 200, 1_234, 55, None);
        log.topics[0] = answer_updated_topic();
        assert!(matches!(
            decode_price_updated(&log),
            Err(ReadError::MalformedResponse(_))
        ));

        log.topics[0] = B256::repeat_byte(0xee);
        assert!(decode_price_updated(&log).is_err());

        log.topics.clear();
        assert!(decode_price_updated(&log).is_err());

        let mut answer = answer_updated_log(1, 1, 1);
        answer.topics[0] = price_updated_topic();
        assert!(matches!(
            decode_answer_updated(&answer),
            Err(ReadError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_decode_answer_updated() {
        let point = decode_answer_updated(&answer_updated_log(300_000_000_000, 9, 4_000)).unwrap();
        assert_eq!(point.price, 300_000_000_000);
        assert_eq!(point.round_id, 9);
        assert_eq!(point.timestamp, 4_000);
    }
}
