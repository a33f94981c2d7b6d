#![no_std]

//! # Lotto
//!
//! A commit-reveal lottery with referral incentives.
//!
//! ## Drawing flow
//! 1. The operator creates a drawing with a ticket price, deadline, reserve
//!    threshold, winner count, and per-winner prize shares.
//! 2. Before buying, each participant commits `sha256(secret)` for the drawing.
//! 3. A purchase pulls `n × price` tokens from the buyer and mints `n` tickets,
//!    all bound to the buyer's committed digest. The commitment is consumed.
//! 4. After the deadline, ticket owners reveal their secrets. Each secret is
//!    verified against the digest stored on the owner's tickets.
//! 5. `reveal_winner` folds one byte of `sha256(id || owner || secret || digest)`
//!    per revealed ticket into an accumulator, derives one selector byte per
//!    prize slot from it, and pays each selected owner their share of the pool.
//!    No single buyer can bias the result: the accumulator depends on every
//!    revealed secret, and secrets are fixed by their pre-purchase commitments.
//!
//! ## Fee split
//! Every payment is split 5% flat referral bonus / 5% tree bonus / 10% house
//! fee / 80% prize pool. The referral bonus goes to the named referrer if they
//! hold a ticket. The tree bonus is divided among referrers who became
//! eligible more recently (higher tree position) than the credited one; when
//! none exist, that share stays on the contract balance.
//!
//! ## Referral tree
//! Each identity's first qualifying referral creates an aggregate at tree
//! position 0. A repeat referral of the same identity re-seats it at the
//! highest position assigned so far plus one, so the seniority counter only
//! moves forward. At most one referral edge may exist between any two
//! identities, in either direction.

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, token, Address, Bytes,
    BytesN, Env, Map, String, Symbol, Vec,
};

// ═══════════════════════════════════════════════════════════════════════════════
//  Contract Events
// ═══════════════════════════════════════════════════════════════════════════════

#[contractevent]
pub struct EvDrawingCreated {
    pub drawing_id: Symbol,
    pub token: Address,
    pub price: i128,
    pub ends_at: u64,
    pub winner_count: u32,
}

#[contractevent]
pub struct EvDeadlineExtended {
    pub drawing_id: Symbol,
    pub ends_at: u64,
}

#[contractevent]
pub struct EvDrawingDeleted {
    pub drawing_id: Symbol,
}

#[contractevent]
pub struct EvCommitmentSubmitted {
    pub drawing_id: Symbol,
    pub participant: Address,
}

/// Emitted once per purchase, after all tickets are minted.
#[contractevent]
pub struct EvTicketsPurchased {
    pub drawing_id: Symbol,
    pub buyer: Address,
    pub ticket_count: u32,
    pub amount: i128,
    pub prize_added: i128,
}

#[contractevent]
pub struct EvReferralBonusPaid {
    pub drawing_id: Symbol,
    pub referrer: Address,
    pub amount: i128,
}

/// Emitted once per purchase that triggers a tree payout. `per_member` is the
/// even split each junior referrer received.
#[contractevent]
pub struct EvTreeBonusPaid {
    pub drawing_id: Symbol,
    pub members: u32,
    pub per_member: i128,
}

#[contractevent]
pub struct EvSecretRevealed {
    pub drawing_id: Symbol,
    pub participant: Address,
    pub tickets_matched: u32,
}

#[contractevent]
pub struct EvWinnerPaid {
    pub drawing_id: Symbol,
    pub slot: u32,
    pub ticket_id: u32,
    pub winner: Address,
    pub amount: i128,
}

#[contractevent]
pub struct EvDrawingSettled {
    pub drawing_id: Symbol,
    pub ticket_count: u32,
}

/// Emitted when settlement runs against a drawing with no tickets sold.
#[contractevent]
pub struct EvNoTicketsSold {
    pub drawing_id: Symbol,
}

#[contractevent]
pub struct EvDrawingCleaned {
    pub drawing_id: Symbol,
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LottoError {
    DrawingNotFound = 1,
    DrawingAlreadyExists = 2,
    AdminNotSet = 3,
    NotAuthorized = 4,
    InvalidPrice = 5,
    DeadlineInPast = 6,
    InvalidWinShares = 7,
    CommitmentAlreadySubmitted = 8,
    CommitmentMissing = 9,
    WrongCurrency = 10,
    AmountNotDivisible = 11,
    InvalidAmount = 12,
    SoldOut = 13,
    TicketLimitExceeded = 14,
    DrawingEnded = 15,
    DrawingNotEnded = 16,
    ReserveNotMet = 17,
    NoTicketsForParticipant = 18,
    NoMatchingCommitment = 19,
    NoCommitmentReveals = 20,
    AlreadySettled = 21,
    TicketNotFound = 22,
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Storage types & keys
// ═══════════════════════════════════════════════════════════════════════════════

/// One lottery instance. `prize_pool` accumulates the post-fee 80% of every
/// payment and is disbursed exactly once (`settled` guards re-entry).
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Drawing {
    pub title: String,
    pub description: String,
    pub image: String,
    /// Ticket count below which the drawing may not settle; purchases stay
    /// open past the deadline until this many tickets are sold.
    pub reserve_threshold: u32,
    /// 0 = unlimited.
    pub ticket_limit: u32,
    pub winner_count: u32,
    pub token: Address,
    /// Unit price per ticket, in `token` units.
    pub price: i128,
    pub ends_at: u64,
    pub prize_pool: i128,
    pub settled: bool,
}

/// A numbered ticket. `secret` stays empty until the owner reveals.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ticket {
    pub owner: Address,
    pub commitment: BytesN<32>,
    pub secret: Bytes,
}

/// Directed record of who referred whom. At most one edge per unordered pair.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReferralEdge {
    pub referred: Address,
    pub referrer: Address,
}

/// Per-referrer aggregate used for tree-bonus splitting.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReferrerStats {
    /// Seniority rank: higher = became eligible more recently.
    pub tree_position: u64,
    pub referral_count: u32,
}

#[contracttype]
#[derive(Clone)]
enum DataKey {
    Admin,
    /// Registry of live drawing ids, scanned by `close_and_settle_all`.
    DrawingIds,
    Drawing(Symbol),
    /// Vec<u32> of win shares in basis points, consumed in insertion order.
    WinShares(Symbol),
    /// Map<Address, BytesN<32>> of unconsumed commitments.
    Commitments(Symbol),
    TicketCount(Symbol),
    Ticket(Symbol, u32),
    /// Vec<ReferralEdge>, append-only.
    Edges(Symbol),
    /// Map<Address, ReferrerStats>.
    Referrers(Symbol),
    /// Highest tree position assigned so far in this drawing.
    MaxTreePos(Symbol),
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Basis-point denominator for all percentage math.
pub const BPS_DENOM: i128 = 10_000;

/// Flat referral bonus: 5% of each payment.
pub const REFERRAL_BPS: i128 = 500;
/// Tree bonus pool: 5% of each payment, split among junior referrers.
pub const TREE_BPS: i128 = 500;
/// House fee: 10% of each payment, retained on the contract balance.
pub const HOUSE_FEE_BPS: i128 = 1000;

// Ledger rate is approximately 5 seconds per ledger on Stellar
const LEDGER_RATE_SECS: u32 = 5;

// TTL expressed in human-readable time units (30 days)
const TTL_SECONDS: u32 = 30 * 24 * 60 * 60; // 2,592,000 seconds

/// TTL for drawing storage in ledgers: 30 * 24 * 60 * 60 / 5 = 518,400 ledgers
const TABLE_TTL_LEDGERS: u32 = TTL_SECONDS / LEDGER_RATE_SECS;

// ═══════════════════════════════════════════════════════════════════════════════
//  Contract
// ═══════════════════════════════════════════════════════════════════════════════

#[contract]
pub struct LottoContract;

#[contractimpl]
impl LottoContract {
    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Constructor & drawing lifecycle
    // ───────────────────────────────────────────────────────────────────────────

    pub fn __constructor(env: Env, admin: Address) {
        env.storage().instance().set(&DataKey::Admin, &admin);
    }

    /// Create a drawing. Operator only.
    ///
    /// `win_shares` are basis points per winner slot (10_000 = the whole pool)
    /// and must provide at least one entry per winner slot. Their sum is the
    /// operator's responsibility and is not validated.
    pub fn create_drawing(
        env: Env,
        drawing_id: Symbol,
        title: String,
        description: String,
        image: String,
        reserve_threshold: u32,
        ticket_limit: u32,
        winner_count: u32,
        ends_at: u64,
        token: Address,
        price: i128,
        win_shares: Vec<u32>,
    ) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();

        let key = DataKey::Drawing(drawing_id.clone());
        if env.storage().persistent().has(&key) {
            return Err(LottoError::DrawingAlreadyExists);
        }
        if price <= 0 {
            return Err(LottoError::InvalidPrice);
        }
        if ends_at <= env.ledger().timestamp() {
            return Err(LottoError::DeadlineInPast);
        }
        if win_shares.len() < winner_count {
            return Err(LottoError::InvalidWinShares);
        }

        let drawing = Drawing {
            title,
            description,
            image,
            reserve_threshold,
            ticket_limit,
            winner_count,
            token: token.clone(),
            price,
            ends_at,
            prize_pool: 0,
            settled: false,
        };
        Self::write_drawing(&env, &drawing_id, &drawing);
        Self::set_table(&env, &DataKey::WinShares(drawing_id.clone()), &win_shares);

        let mut ids = Self::drawing_ids(&env);
        ids.push_back(drawing_id.clone());
        Self::set_table(&env, &DataKey::DrawingIds, &ids);

        EvDrawingCreated {
            drawing_id,
            token,
            price,
            ends_at,
            winner_count,
        }
        .publish(&env);
        Ok(())
    }

    /// Move a drawing's deadline. Operator only; may shorten or lengthen.
    pub fn extend_deadline(
        env: Env,
        drawing_id: Symbol,
        new_ends_at: u64,
    ) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();

        let mut drawing = Self::read_drawing(&env, &drawing_id)?;
        drawing.ends_at = new_ends_at;
        Self::write_drawing(&env, &drawing_id, &drawing);

        EvDeadlineExtended {
            drawing_id,
            ends_at: new_ends_at,
        }
        .publish(&env);
        Ok(())
    }

    /// Delete a drawing and purge every child table, referral state included.
    pub fn delete_drawing(env: Env, drawing_id: Symbol) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();

        // Existence check before any purge work.
        Self::read_drawing(&env, &drawing_id)?;

        Self::purge_core_tables(&env, &drawing_id);
        Self::purge_referral_tables(&env, &drawing_id);
        Self::remove_drawing_record(&env, &drawing_id);

        EvDrawingDeleted { drawing_id }.publish(&env);
        Ok(())
    }

    /// Settle every drawing whose deadline has passed, then drop its Drawing
    /// record. Child tables are left in place — matching the behavior this
    /// contract carries over, where only `delete_drawing` purges them.
    pub fn close_and_settle_all(env: Env) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();

        let now = env.ledger().timestamp();
        // Snapshot the registry first; settlement mutates it.
        let ids = Self::drawing_ids(&env);
        let mut i: u32 = 0;
        while i < ids.len() {
            let id = ids.get(i).unwrap();
            let drawing = Self::read_drawing(&env, &id)?;
            if drawing.ends_at < now {
                // A drawing already paid out via reveal_winner only needs its
                // record retired; it must not wedge the rest of the sweep.
                if !drawing.settled {
                    Self::settle_drawing(&env, &id, drawing)?;
                }
                Self::remove_drawing_record(&env, &id);
            }
            i += 1;
        }
        Ok(())
    }

    /// Empty the ticket, commitment, and win-share tables for a drawing.
    /// Referral tables are not touched here.
    pub fn cleanup(env: Env, drawing_id: Symbol) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();

        Self::read_drawing(&env, &drawing_id)?;
        Self::purge_core_tables(&env, &drawing_id);

        EvDrawingCleaned { drawing_id }.publish(&env);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Commitments
    // ───────────────────────────────────────────────────────────────────────────

    /// Record `sha256(secret)` for a participant ahead of purchase.
    /// Single-use and non-overwritable: resubmission fails until a purchase
    /// consumes the stored digest.
    pub fn submit_commitment(
        env: Env,
        drawing_id: Symbol,
        participant: Address,
        digest: BytesN<32>,
    ) -> Result<(), LottoError> {
        participant.require_auth();

        Self::read_drawing(&env, &drawing_id)?;

        let mut commitments = Self::commitments(&env, &drawing_id);
        if commitments.contains_key(participant.clone()) {
            return Err(LottoError::CommitmentAlreadySubmitted);
        }
        commitments.set(participant.clone(), digest);
        Self::set_table(&env, &DataKey::Commitments(drawing_id.clone()), &commitments);

        EvCommitmentSubmitted {
            drawing_id,
            participant,
        }
        .publish(&env);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Purchase & settlement
    // ───────────────────────────────────────────────────────────────────────────

    /// Buy tickets. Pulls `amount` of `token` from the buyer, pays referral
    /// incentives, credits the prize pool, consumes the buyer's commitment,
    /// and mints `amount / price` tickets bound to that commitment's digest.
    ///
    /// Returns the number of tickets minted.
    pub fn purchase(
        env: Env,
        buyer: Address,
        drawing_id: Symbol,
        token: Address,
        amount: i128,
        referrer: Option<Address>,
    ) -> Result<u32, LottoError> {
        buyer.require_auth();

        let mut drawing = Self::read_drawing(&env, &drawing_id)?;
        let sold = Self::ticket_count_of(&env, &drawing_id);
        let now = env.ledger().timestamp();

        // Purchases stay open past the deadline while the reserve is unmet.
        if now >= drawing.ends_at && sold >= drawing.reserve_threshold {
            return Err(LottoError::DrawingEnded);
        }
        if token != drawing.token {
            return Err(LottoError::WrongCurrency);
        }
        if amount <= 0 {
            return Err(LottoError::InvalidAmount);
        }
        if amount % drawing.price != 0 {
            return Err(LottoError::AmountNotDivisible);
        }
        let minted =
            u32::try_from(amount / drawing.price).map_err(|_| LottoError::InvalidAmount)?;

        let mut commitments = Self::commitments(&env, &drawing_id);
        let digest = commitments
            .get(buyer.clone())
            .ok_or(LottoError::CommitmentMissing)?;

        if drawing.ticket_limit > 0 {
            if sold >= drawing.ticket_limit {
                return Err(LottoError::SoldOut);
            }
            if sold + minted > drawing.ticket_limit {
                return Err(LottoError::TicketLimitExceeded);
            }
        }

        // Pull the full payment, then pay incentives out of it.
        let token_client = token::Client::new(&env, &drawing.token);
        token_client.transfer(&buyer, &env.current_contract_address(), &amount);

        Self::settle_referrals(&env, &drawing_id, &buyer, referrer, &token_client, amount);

        // 80% of the payment lands in the pool; referral, tree, and house
        // shares are deducted whether or not they were transferred anywhere.
        let fees = amount * (REFERRAL_BPS + TREE_BPS + HOUSE_FEE_BPS) / BPS_DENOM;
        let prize_added = amount - fees;
        drawing.prize_pool += prize_added;
        Self::write_drawing(&env, &drawing_id, &drawing);

        // Consume the commitment, then mint tickets bound to its digest.
        commitments.remove(buyer.clone());
        Self::set_table(&env, &DataKey::Commitments(drawing_id.clone()), &commitments);

        let mut n: u32 = 0;
        while n < minted {
            let ticket = Ticket {
                owner: buyer.clone(),
                commitment: digest.clone(),
                secret: Bytes::new(&env),
            };
            Self::set_table(&env, &DataKey::Ticket(drawing_id.clone(), sold + n), &ticket);
            n += 1;
        }
        Self::set_table(&env, &DataKey::TicketCount(drawing_id.clone()), &(sold + minted));

        EvTicketsPurchased {
            drawing_id,
            buyer,
            ticket_count: minted,
            amount,
            prize_added,
        }
        .publish(&env);
        Ok(minted)
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Reveal & winner selection
    // ───────────────────────────────────────────────────────────────────────────

    /// Reveal a secret after the drawing closes. `caller` must be the
    /// participant or the operator. The secret is written onto every ticket
    /// owned by `participant` whose commitment digest equals `sha256(secret)`.
    ///
    /// Returns the number of tickets the secret matched.
    pub fn reveal_secret(
        env: Env,
        caller: Address,
        drawing_id: Symbol,
        participant: Address,
        secret: Bytes,
    ) -> Result<u32, LottoError> {
        caller.require_auth();
        if caller != participant && caller != Self::load_admin(&env)? {
            return Err(LottoError::NotAuthorized);
        }

        let drawing = Self::read_drawing(&env, &drawing_id)?;
        let now = env.ledger().timestamp();
        if drawing.ends_at >= now {
            return Err(LottoError::DrawingNotEnded);
        }
        let count = Self::ticket_count_of(&env, &drawing_id);
        if count < drawing.reserve_threshold {
            return Err(LottoError::ReserveNotMet);
        }

        let digest: BytesN<32> = env.crypto().sha256(&secret).into();
        let mut owns_any = false;
        let mut matched: u32 = 0;
        let mut n: u32 = 0;
        while n < count {
            let mut ticket = Self::read_ticket(&env, &drawing_id, n)?;
            if ticket.owner == participant {
                owns_any = true;
                if ticket.commitment == digest {
                    ticket.secret = secret.clone();
                    Self::set_table(&env, &DataKey::Ticket(drawing_id.clone(), n), &ticket);
                    matched += 1;
                }
            }
            n += 1;
        }
        if !owns_any {
            return Err(LottoError::NoTicketsForParticipant);
        }
        if matched == 0 {
            return Err(LottoError::NoMatchingCommitment);
        }

        EvSecretRevealed {
            drawing_id,
            participant,
            tickets_matched: matched,
        }
        .publish(&env);
        Ok(matched)
    }

    /// Select and pay the winners. Operator only. With no tickets sold this is
    /// a no-op; otherwise it requires at least one revealed secret and may run
    /// only once per drawing.
    pub fn reveal_winner(env: Env, drawing_id: Symbol) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();

        let drawing = Self::read_drawing(&env, &drawing_id)?;
        Self::settle_drawing(&env, &drawing_id, drawing)
    }

    /// Recompute the winning ticket positions without moving funds, so anyone
    /// can audit a draw. Deterministic for a fixed ticket ledger.
    pub fn verify_draw(env: Env, drawing_id: Symbol) -> Result<Vec<u32>, LottoError> {
        let drawing = Self::read_drawing(&env, &drawing_id)?;
        let count = Self::ticket_count_of(&env, &drawing_id);
        if count == 0 {
            return Err(LottoError::NoCommitmentReveals);
        }
        Self::select_positions(&env, &drawing_id, &drawing, count)
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Read & Admin
    // ───────────────────────────────────────────────────────────────────────────

    pub fn get_drawing(env: Env, drawing_id: Symbol) -> Result<Drawing, LottoError> {
        Self::read_drawing(&env, &drawing_id)
    }

    pub fn list_drawings(env: Env) -> Vec<Symbol> {
        Self::drawing_ids(&env)
    }

    pub fn get_win_shares(env: Env, drawing_id: Symbol) -> Vec<u32> {
        env.storage()
            .persistent()
            .get(&DataKey::WinShares(drawing_id))
            .unwrap_or_else(|| Vec::new(&env))
    }

    pub fn get_ticket_count(env: Env, drawing_id: Symbol) -> u32 {
        Self::ticket_count_of(&env, &drawing_id)
    }

    pub fn get_ticket(env: Env, drawing_id: Symbol, ticket_id: u32) -> Result<Ticket, LottoError> {
        Self::read_ticket(&env, &drawing_id, ticket_id)
    }

    pub fn get_commitment(
        env: Env,
        drawing_id: Symbol,
        participant: Address,
    ) -> Option<BytesN<32>> {
        Self::commitments(&env, &drawing_id).get(participant)
    }

    pub fn get_referrer_stats(
        env: Env,
        drawing_id: Symbol,
        referrer: Address,
    ) -> Option<ReferrerStats> {
        Self::referrers(&env, &drawing_id).get(referrer)
    }

    pub fn get_referral_edges(env: Env, drawing_id: Symbol) -> Vec<ReferralEdge> {
        Self::edges(&env, &drawing_id)
    }

    pub fn get_admin(env: Env) -> Result<Address, LottoError> {
        Self::load_admin(&env)
    }

    pub fn set_admin(env: Env, new_admin: Address) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        env.storage().instance().set(&DataKey::Admin, &new_admin);
        Ok(())
    }

    pub fn upgrade(env: Env, new_wasm_hash: BytesN<32>) -> Result<(), LottoError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        env.deployer().update_current_contract_wasm(new_wasm_hash);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Referral settlement
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pay referral incentives for one purchase and maintain the referral
    /// graph. The flat bonus is paid whenever the referrer holds a ticket and
    /// is not the buyer, regardless of edge validity. The edge, aggregate
    /// update, and tree payout happen only for a first-time pairing.
    fn settle_referrals(
        env: &Env,
        drawing_id: &Symbol,
        buyer: &Address,
        referrer: Option<Address>,
        token_client: &token::Client,
        amount: i128,
    ) {
        let referrer = match referrer {
            Some(r) => r,
            None => return,
        };
        if referrer == *buyer {
            return;
        }
        // Referrer must already be in the ticket ledger for this drawing.
        if !Self::holds_ticket(env, drawing_id, &referrer) {
            return;
        }

        let flat = amount * REFERRAL_BPS / BPS_DENOM;
        token_client.transfer(&env.current_contract_address(), &referrer, &flat);
        EvReferralBonusPaid {
            drawing_id: drawing_id.clone(),
            referrer: referrer.clone(),
            amount: flat,
        }
        .publish(env);

        let mut edges = Self::edges(env, drawing_id);
        if Self::edge_exists(&edges, buyer, &referrer) {
            // Repeat pairing: bonus above already paid, nothing else moves.
            return;
        }

        let mut referrers = Self::referrers(env, drawing_id);
        let position = match referrers.get(referrer.clone()) {
            Some(mut stats) => {
                // Re-seat at the newest position; the counter never rewinds.
                let next = Self::max_tree_pos(env, drawing_id) + 1;
                Self::set_table(env, &DataKey::MaxTreePos(drawing_id.clone()), &next);
                stats.tree_position = next;
                stats.referral_count += 1;
                referrers.set(referrer.clone(), stats);
                next
            }
            None => {
                referrers.set(
                    referrer.clone(),
                    ReferrerStats {
                        tree_position: 0,
                        referral_count: 1,
                    },
                );
                0
            }
        };
        Self::set_table(env, &DataKey::Referrers(drawing_id.clone()), &referrers);

        edges.push_back(ReferralEdge {
            referred: buyer.clone(),
            referrer: referrer.clone(),
        });
        Self::set_table(env, &DataKey::Edges(drawing_id.clone()), &edges);

        // Tree bonus: split evenly across referrers seated after `position`.
        // With no juniors the 5% share stays on the contract balance.
        let mut juniors: Vec<Address> = Vec::new(env);
        let keys = referrers.keys();
        let mut i: u32 = 0;
        while i < keys.len() {
            let addr = keys.get(i).unwrap();
            let stats = referrers.get(addr.clone()).unwrap();
            if stats.tree_position > position {
                juniors.push_back(addr);
            }
            i += 1;
        }
        if juniors.is_empty() {
            return;
        }
        let per_member = amount * TREE_BPS / BPS_DENOM / juniors.len() as i128;
        let mut j: u32 = 0;
        while j < juniors.len() {
            let member = juniors.get(j).unwrap();
            token_client.transfer(&env.current_contract_address(), &member, &per_member);
            j += 1;
        }
        EvTreeBonusPaid {
            drawing_id: drawing_id.clone(),
            members: juniors.len(),
            per_member,
        }
        .publish(env);
    }

    fn holds_ticket(env: &Env, drawing_id: &Symbol, who: &Address) -> bool {
        let count = Self::ticket_count_of(env, drawing_id);
        let mut n: u32 = 0;
        while n < count {
            if let Some(ticket) = Self::try_read_ticket(env, drawing_id, n) {
                if ticket.owner == *who {
                    return true;
                }
            }
            n += 1;
        }
        false
    }

    fn edge_exists(edges: &Vec<ReferralEdge>, a: &Address, b: &Address) -> bool {
        let mut i: u32 = 0;
        while i < edges.len() {
            let edge = edges.get(i).unwrap();
            if (edge.referred == *a && edge.referrer == *b)
                || (edge.referred == *b && edge.referrer == *a)
            {
                return true;
            }
            i += 1;
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Winner selection
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run winner selection for one drawing and pay the prizes. No tickets
    /// sold is a no-op; any later caller removing the Drawing record is
    /// responsible for its children.
    fn settle_drawing(
        env: &Env,
        drawing_id: &Symbol,
        mut drawing: Drawing,
    ) -> Result<(), LottoError> {
        let count = Self::ticket_count_of(env, drawing_id);
        if count == 0 {
            EvNoTicketsSold {
                drawing_id: drawing_id.clone(),
            }
            .publish(env);
            return Ok(());
        }
        if drawing.settled {
            return Err(LottoError::AlreadySettled);
        }

        let positions = Self::select_positions(env, drawing_id, &drawing, count)?;
        let shares: Vec<u32> = env
            .storage()
            .persistent()
            .get(&DataKey::WinShares(drawing_id.clone()))
            .ok_or(LottoError::InvalidWinShares)?;

        let token_client = token::Client::new(env, &drawing.token);
        let mut slot: u32 = 0;
        while slot < drawing.winner_count {
            let position = positions.get(slot).unwrap();
            let ticket = Self::read_ticket(env, drawing_id, position)?;
            let share = shares.get(slot).ok_or(LottoError::InvalidWinShares)?;
            let prize = drawing.prize_pool * share as i128 / BPS_DENOM;
            token_client.transfer(&env.current_contract_address(), &ticket.owner, &prize);
            EvWinnerPaid {
                drawing_id: drawing_id.clone(),
                slot,
                ticket_id: position,
                winner: ticket.owner,
                amount: prize,
            }
            .publish(env);
            slot += 1;
        }

        drawing.settled = true;
        Self::write_drawing(env, drawing_id, &drawing);

        EvDrawingSettled {
            drawing_id: drawing_id.clone(),
            ticket_count: count,
        }
        .publish(env);
        Ok(())
    }

    /// Derive the winning ticket positions from the revealed secrets.
    ///
    /// Every revealed ticket contributes the first byte of
    /// `sha256(ticket_id_be4 || owner || secret || commitment)` to a wrapping
    /// u32 accumulator, in ascending ticket-id order. Each prize slot then
    /// selects `sha256(acc_be4 || slot_be4)[0] % count`. Unrevealed tickets
    /// contribute no entropy but remain selectable by position.
    fn select_positions(
        env: &Env,
        drawing_id: &Symbol,
        drawing: &Drawing,
        count: u32,
    ) -> Result<Vec<u32>, LottoError> {
        let mut acc: u32 = 0;
        let mut n: u32 = 0;
        while n < count {
            let ticket = Self::read_ticket(env, drawing_id, n)?;
            if ticket.secret.len() > 0 {
                let mut preimage = Bytes::from_array(env, &n.to_be_bytes());
                preimage.append(&ticket.owner.to_string().to_bytes());
                preimage.append(&ticket.secret);
                preimage.append(&Bytes::from_array(env, &ticket.commitment.to_array()));
                let digest: BytesN<32> = env.crypto().sha256(&preimage).into();
                acc = acc.wrapping_add(digest.to_array()[0] as u32);
            }
            n += 1;
        }
        if acc == 0 {
            return Err(LottoError::NoCommitmentReveals);
        }

        let mut positions: Vec<u32> = Vec::new(env);
        let mut slot: u32 = 0;
        while slot < drawing.winner_count {
            let mut preimage = Bytes::from_array(env, &acc.to_be_bytes());
            preimage.append(&Bytes::from_array(env, &slot.to_be_bytes()));
            let digest: BytesN<32> = env.crypto().sha256(&preimage).into();
            let selector = digest.to_array()[0] as u32;
            positions.push_back(selector % count);
            slot += 1;
        }
        Ok(positions)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Table purging
    // ═══════════════════════════════════════════════════════════════════════════

    /// Remove tickets, commitments, and win shares for a drawing. Keys are
    /// snapshotted before removal.
    fn purge_core_tables(env: &Env, drawing_id: &Symbol) {
        let count = Self::ticket_count_of(env, drawing_id);
        let mut n: u32 = 0;
        while n < count {
            env.storage()
                .persistent()
                .remove(&DataKey::Ticket(drawing_id.clone(), n));
            n += 1;
        }
        env.storage()
            .persistent()
            .remove(&DataKey::TicketCount(drawing_id.clone()));
        env.storage()
            .persistent()
            .remove(&DataKey::Commitments(drawing_id.clone()));
        env.storage()
            .persistent()
            .remove(&DataKey::WinShares(drawing_id.clone()));
    }

    fn purge_referral_tables(env: &Env, drawing_id: &Symbol) {
        env.storage()
            .persistent()
            .remove(&DataKey::Edges(drawing_id.clone()));
        env.storage()
            .persistent()
            .remove(&DataKey::Referrers(drawing_id.clone()));
        env.storage()
            .persistent()
            .remove(&DataKey::MaxTreePos(drawing_id.clone()));
    }

    fn remove_drawing_record(env: &Env, drawing_id: &Symbol) {
        env.storage()
            .persistent()
            .remove(&DataKey::Drawing(drawing_id.clone()));
        let mut ids = Self::drawing_ids(env);
        if let Some(index) = ids.first_index_of(drawing_id.clone()) {
            ids.remove(index);
            Self::set_table(env, &DataKey::DrawingIds, &ids);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Storage
    // ═══════════════════════════════════════════════════════════════════════════

    fn read_drawing(env: &Env, drawing_id: &Symbol) -> Result<Drawing, LottoError> {
        env.storage()
            .persistent()
            .get(&DataKey::Drawing(drawing_id.clone()))
            .ok_or(LottoError::DrawingNotFound)
    }

    fn write_drawing(env: &Env, drawing_id: &Symbol, drawing: &Drawing) {
        Self::set_table(env, &DataKey::Drawing(drawing_id.clone()), drawing);
        // Keep instance storage (admin address) alive alongside drawing data.
        env.storage()
            .instance()
            .extend_ttl(TABLE_TTL_LEDGERS, TABLE_TTL_LEDGERS);
    }

    fn read_ticket(env: &Env, drawing_id: &Symbol, n: u32) -> Result<Ticket, LottoError> {
        Self::try_read_ticket(env, drawing_id, n).ok_or(LottoError::TicketNotFound)
    }

    fn try_read_ticket(env: &Env, drawing_id: &Symbol, n: u32) -> Option<Ticket> {
        env.storage()
            .persistent()
            .get(&DataKey::Ticket(drawing_id.clone(), n))
    }

    fn ticket_count_of(env: &Env, drawing_id: &Symbol) -> u32 {
        env.storage()
            .persistent()
            .get(&DataKey::TicketCount(drawing_id.clone()))
            .unwrap_or(0)
    }

    fn commitments(env: &Env, drawing_id: &Symbol) -> Map<Address, BytesN<32>> {
        env.storage()
            .persistent()
            .get(&DataKey::Commitments(drawing_id.clone()))
            .unwrap_or_else(|| Map::new(env))
    }

    fn edges(env: &Env, drawing_id: &Symbol) -> Vec<ReferralEdge> {
        env.storage()
            .persistent()
            .get(&DataKey::Edges(drawing_id.clone()))
            .unwrap_or_else(|| Vec::new(env))
    }

    fn referrers(env: &Env, drawing_id: &Symbol) -> Map<Address, ReferrerStats> {
        env.storage()
            .persistent()
            .get(&DataKey::Referrers(drawing_id.clone()))
            .unwrap_or_else(|| Map::new(env))
    }

    fn max_tree_pos(env: &Env, drawing_id: &Symbol) -> u64 {
        env.storage()
            .persistent()
            .get(&DataKey::MaxTreePos(drawing_id.clone()))
            .unwrap_or(0)
    }

    fn drawing_ids(env: &Env) -> Vec<Symbol> {
        env.storage()
            .persistent()
            .get(&DataKey::DrawingIds)
            .unwrap_or_else(|| Vec::new(env))
    }

    fn set_table<K, V>(env: &Env, key: &K, value: &V)
    where
        K: soroban_sdk::IntoVal<Env, soroban_sdk::Val>,
        V: soroban_sdk::IntoVal<Env, soroban_sdk::Val>,
    {
        env.storage().persistent().set(key, value);
        env.storage()
            .persistent()
            .extend_ttl(key, TABLE_TTL_LEDGERS, TABLE_TTL_LEDGERS);
    }

    fn load_admin(env: &Env) -> Result<Address, LottoError> {
        env.storage()
            .instance()
            .get(&DataKey::Admin)
            .ok_or(LottoError::AdminNotSet)
    }
}
